//! Shared table of filter jobs keyed by session id.
//!
//! The registry is the only state touched by more than one thread: workers
//! publish progress into it, pollers read clones out of it, and teardown
//! removes entries. Its mutex guards the map operation only; artifact files
//! are deleted after the lock is released.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::utils::DetectedEncoding;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Finished,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one filter job. Readers always get a full clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub session_id: String,
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    pub index_path: PathBuf,
    pub encoding: DetectedEncoding,
    pub keep_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub status: JobStatus,
    pub lines_written: u64,
    pub lines_scanned: u64,
    pub bytes_scanned: u64,
    pub source_bytes: u64,
    /// Approximate: derived from the source size and an assumed average
    /// line length, then raised to the real count once known.
    pub estimated_total_lines: u64,
    /// Latched once the first chunk of output is flushed and readable
    pub first_chunk_ready: bool,
    pub error_message: Option<String>,
    pub started_at_ms: u64,
    pub finished_at_ms: Option<u64>,
}

impl JobState {
    /// A fresh `Running` job
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: String,
        source_path: PathBuf,
        output_path: PathBuf,
        index_path: PathBuf,
        encoding: DetectedEncoding,
        keep_patterns: Vec<String>,
        exclude_patterns: Vec<String>,
        source_bytes: u64,
        assumed_avg_line_bytes: u64,
    ) -> Self {
        Self {
            session_id,
            source_path,
            output_path,
            index_path,
            encoding,
            keep_patterns,
            exclude_patterns,
            status: JobStatus::Running,
            lines_written: 0,
            lines_scanned: 0,
            bytes_scanned: 0,
            source_bytes,
            estimated_total_lines: source_bytes.div_ceil(assumed_avg_line_bytes.max(1)),
            first_chunk_ready: false,
            error_message: None,
            started_at_ms: now_ms(),
            finished_at_ms: None,
        }
    }

    /// Share of the source scanned, 0.0 to 100.0
    pub fn percent(&self) -> f64 {
        if self.status == JobStatus::Finished {
            return 100.0;
        }
        if self.source_bytes == 0 {
            return 0.0;
        }
        (self.bytes_scanned as f64 * 100.0 / self.source_bytes as f64).min(100.0)
    }

    fn apply(&mut self, update: JobUpdate) {
        // Counters never go backwards
        if let Some(n) = update.lines_written {
            self.lines_written = self.lines_written.max(n);
        }
        if let Some(n) = update.lines_scanned {
            self.lines_scanned = self.lines_scanned.max(n);
        }
        if let Some(n) = update.bytes_scanned {
            self.bytes_scanned = self.bytes_scanned.max(n);
        }
        self.estimated_total_lines = self.estimated_total_lines.max(self.lines_scanned);
        self.first_chunk_ready |= update.first_chunk_ready;

        // Terminal states are sticky
        if let Some(status) = update.status
            && !self.status.is_terminal()
            && status.is_terminal()
        {
            self.status = status;
            self.finished_at_ms = Some(now_ms());
            if status == JobStatus::Error {
                self.error_message = Some(
                    update
                        .error_message
                        .unwrap_or_else(|| "unknown error".to_string()),
                );
            }
        }
    }
}

/// Partial update published by a worker
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub lines_written: Option<u64>,
    pub lines_scanned: Option<u64>,
    pub bytes_scanned: Option<u64>,
    pub first_chunk_ready: bool,
    pub error_message: Option<String>,
}

impl JobUpdate {
    pub fn progress(lines_written: u64, lines_scanned: u64, bytes_scanned: u64) -> Self {
        Self {
            lines_written: Some(lines_written),
            lines_scanned: Some(lines_scanned),
            bytes_scanned: Some(bytes_scanned),
            ..Self::default()
        }
    }

    pub fn first_chunk_ready(mut self) -> Self {
        self.first_chunk_ready = true;
        self
    }

    pub fn finished(mut self) -> Self {
        self.status = Some(JobStatus::Finished);
        self
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Error),
            error_message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Worker-side view of a registry entry
#[derive(Debug, Clone)]
pub struct JobHandle {
    session_id: String,
    cancelled: Arc<AtomicBool>,
}

impl JobHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Raised when the entry is removed or moved out of `Running` externally
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

struct JobEntry {
    state: JobState,
    cancelled: Arc<AtomicBool>,
}

impl JobEntry {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Thread-safe job table, shared as `Arc<JobRegistry>`
#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<AHashMap<String, JobEntry>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, AHashMap<String, JobEntry>> {
        // A panicking worker cannot leave the map half-updated
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a job and hand back the worker's handle. An existing entry
    /// under the same id is cancelled and replaced.
    pub fn create(&self, state: JobState) -> JobHandle {
        let session_id = state.session_id.clone();
        let cancelled = Arc::new(AtomicBool::new(false));
        let entry = JobEntry {
            state,
            cancelled: Arc::clone(&cancelled),
        };

        let replaced = self.entries().insert(session_id.clone(), entry);
        if let Some(old) = replaced {
            old.cancel();
        }

        JobHandle {
            session_id,
            cancelled,
        }
    }

    /// Clone of the job state
    pub fn get(&self, session_id: &str) -> Option<JobState> {
        self.entries().get(session_id).map(|e| e.state.clone())
    }

    /// Apply an update. Returns false when the entry no longer exists.
    pub fn update(&self, session_id: &str, update: JobUpdate) -> bool {
        let mut jobs = self.entries();
        let Some(entry) = jobs.get_mut(session_id) else {
            return false;
        };

        let was_running = !entry.state.status.is_terminal();
        entry.state.apply(update);
        if was_running && entry.state.status.is_terminal() {
            entry.cancel();
        }
        true
    }

    /// Remove one job, raising its cancellation flag. Returns whether the
    /// entry existed.
    pub fn delete(&self, session_id: &str, delete_files: bool) -> bool {
        let removed = self.entries().remove(session_id);
        match removed {
            Some(entry) => {
                entry.cancel();
                if delete_files {
                    remove_artifacts(&entry.state);
                }
                debug!(session = session_id, "job removed");
                true
            }
            None => false,
        }
    }

    /// Remove every job. Returns how many were removed.
    pub fn delete_all(&self, delete_files: bool) -> usize {
        let drained: Vec<JobEntry> = self.entries().drain().map(|(_, entry)| entry).collect();
        for entry in &drained {
            entry.cancel();
        }
        if delete_files {
            for entry in &drained {
                remove_artifacts(&entry.state);
            }
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }
}

/// Delete a job's output and index files, ignoring ones already gone
pub fn remove_artifacts(state: &JobState) {
    remove_if_exists(&state.output_path);
    remove_if_exists(&state.index_path);
}

pub(crate) fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove artifact"),
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn state(id: &str, dir: &Path) -> JobState {
        JobState::new(
            id.to_string(),
            dir.join("source.log"),
            dir.join(format!("{}.out", id)),
            dir.join(format!("{}.idx", id)),
            DetectedEncoding::utf8(),
            vec!["ERROR".to_string()],
            Vec::new(),
            12_000,
            120,
        )
    }

    #[test]
    fn test_new_job_is_running_with_estimate() {
        let dir = tempdir().unwrap();
        let job = state("a", dir.path());
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.estimated_total_lines, 100);
        assert!(!job.first_chunk_ready);
        assert_eq!(job.percent(), 0.0);
    }

    #[test]
    fn test_get_returns_a_copy() {
        let dir = tempdir().unwrap();
        let registry = JobRegistry::new();
        registry.create(state("a", dir.path()));

        let mut copy = registry.get("a").unwrap();
        copy.lines_written = 999;
        assert_eq!(registry.get("a").unwrap().lines_written, 0);
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_counters_are_monotonic() {
        let dir = tempdir().unwrap();
        let registry = JobRegistry::new();
        registry.create(state("a", dir.path()));

        assert!(registry.update("a", JobUpdate::progress(10, 50, 6000)));
        assert!(registry.update("a", JobUpdate::progress(5, 20, 100)));

        let job = registry.get("a").unwrap();
        assert_eq!(job.lines_written, 10);
        assert_eq!(job.lines_scanned, 50);
        assert_eq!(job.percent(), 50.0);
    }

    #[test]
    fn test_first_chunk_latch_never_clears() {
        let dir = tempdir().unwrap();
        let registry = JobRegistry::new();
        registry.create(state("a", dir.path()));

        registry.update("a", JobUpdate::progress(200, 200, 10).first_chunk_ready());
        registry.update("a", JobUpdate::progress(201, 201, 11));
        assert!(registry.get("a").unwrap().first_chunk_ready);
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let dir = tempdir().unwrap();
        let registry = JobRegistry::new();
        registry.create(state("a", dir.path()));

        registry.update("a", JobUpdate::failed("disk full"));
        registry.update("a", JobUpdate::default().finished());

        let job = registry.get("a").unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error_message.as_deref(), Some("disk full"));
        assert!(job.finished_at_ms.is_some());
    }

    #[test]
    fn test_finish_reports_full_percent_and_real_count() {
        let dir = tempdir().unwrap();
        let registry = JobRegistry::new();
        registry.create(state("a", dir.path()));

        registry.update("a", JobUpdate::progress(3, 400, 11_000).finished());
        let job = registry.get("a").unwrap();
        assert_eq!(job.percent(), 100.0);
        assert_eq!(job.estimated_total_lines, 400);
        assert!(job.error_message.is_none());
    }

    #[test]
    fn test_delete_cancels_and_removes_files() {
        let dir = tempdir().unwrap();
        let registry = JobRegistry::new();
        let job = state("a", dir.path());
        fs::write(&job.output_path, b"x\n").unwrap();
        fs::write(&job.index_path, b"idx").unwrap();
        let handle = registry.create(job.clone());

        assert!(!handle.is_cancelled());
        assert!(registry.delete("a", true));
        assert!(handle.is_cancelled());
        assert!(!job.output_path.exists());
        assert!(!job.index_path.exists());
        assert!(!registry.delete("a", true));
        assert!(!registry.update("a", JobUpdate::progress(1, 1, 1)));
    }

    #[test]
    fn test_delete_can_keep_files() {
        let dir = tempdir().unwrap();
        let registry = JobRegistry::new();
        let job = state("a", dir.path());
        fs::write(&job.output_path, b"x\n").unwrap();
        registry.create(job.clone());

        assert!(registry.delete("a", false));
        assert!(job.output_path.exists());
    }

    #[test]
    fn test_delete_all() {
        let dir = tempdir().unwrap();
        let registry = JobRegistry::new();
        let a = registry.create(state("a", dir.path()));
        let b = registry.create(state("b", dir.path()));
        assert_eq!(registry.len(), 2);

        let mut ids = registry.session_ids();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);

        assert_eq!(registry.delete_all(true), 2);
        assert!(registry.is_empty());
        assert!(a.is_cancelled() && b.is_cancelled());
    }

    #[test]
    fn test_recreate_cancels_previous_handle() {
        let dir = tempdir().unwrap();
        let registry = JobRegistry::new();
        let first = registry.create(state("a", dir.path()));
        let second = registry.create(state("a", dir.path()));

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_external_terminal_update_cancels_worker() {
        let dir = tempdir().unwrap();
        let registry = JobRegistry::new();
        let handle = registry.create(state("a", dir.path()));

        registry.update("a", JobUpdate::failed("stopped by operator"));
        assert!(handle.is_cancelled());
    }
}
