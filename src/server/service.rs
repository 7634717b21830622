//! Request handling shared by the daemon and the in-process CLI.
//!
//! `FilterService` owns the job registry and turns protocol-level calls into
//! registry operations, window reads, and searches. Nothing here blocks on a
//! running job.

use crate::error::{FilterError, Result};
use crate::filter::{
    spawn_filter_job, FilterPlan, JobRegistry, JobState, JobStatus, KeywordConfig, PatternSet,
};
use crate::index::{centered_range, read_lines, LineIndex};
use crate::search;
use crate::server::protocol::{ProgressReport, SearchResponse, SourceInfo, WindowResponse};
use crate::server::sources::{LogDirectory, SourceResolver};
use crate::utils::{detect_encoding, AppConfig};
use lru::LruCache;
use std::fs;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Window size used when a jump request does not name one
pub const DEFAULT_WINDOW_LINES: u64 = 500;

/// Largest window served in one response
pub const MAX_WINDOW_LINES: u64 = 10_000;

const OUTPUT_EXTENSION: &str = "out";
const INDEX_EXTENSION: &str = "idx";

pub struct FilterService {
    registry: Arc<JobRegistry>,
    config: AppConfig,
    sources: Box<dyn SourceResolver>,
    /// Loaded indexes of finished sessions
    index_cache: Mutex<LruCache<String, Arc<LineIndex>>>,
}

impl FilterService {
    /// Service over the configured log directory
    pub fn new(config: AppConfig) -> Result<Self> {
        let sources = LogDirectory::new(config.log_dir.clone(), &config.source_globs)?;
        Ok(Self::with_resolver(config, Box::new(sources)))
    }

    pub fn with_resolver(config: AppConfig, sources: Box<dyn SourceResolver>) -> Self {
        let config = config.normalized();
        let cache_size = NonZeroUsize::new(config.index_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            registry: Arc::new(JobRegistry::new()),
            config,
            sources,
            index_cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Merge named keyword configurations with ad-hoc keywords. Ad-hoc
    /// `keep` entries count as keep, like configuration entries.
    pub fn resolve_keywords(
        &self,
        configs: &[String],
        keep: &[String],
        exclude: &[String],
    ) -> Result<KeywordConfig> {
        KeywordConfig::resolve(&self.config.keyword_config_dir, configs, keep, exclude)
    }

    /// Start a filter job and return its session id. Every existing session
    /// is removed first. Fails without creating a job when the source is
    /// missing or the keywords do not compile.
    pub fn start_filter(&self, source_id: &str, keep: &[String], exclude: &[String]) -> Result<String> {
        let source_path = self.sources.resolve(source_id)?;
        let source_bytes = fs::metadata(&source_path)
            .map_err(|_| FilterError::SourceNotFound(source_id.to_string()))?
            .len();

        let removed = self.clear_all();
        if removed > 0 {
            debug!(removed, "superseded previous sessions");
        }

        let encoding = detect_encoding(&source_path)?;
        let patterns = PatternSet::compile(keep, exclude, encoding)?;

        fs::create_dir_all(&self.config.work_dir)?;
        let session_id = Uuid::new_v4().to_string();
        let output_path = self
            .config
            .work_dir
            .join(format!("{}.{}", session_id, OUTPUT_EXTENSION));
        let index_path = self
            .config
            .work_dir
            .join(format!("{}.{}", session_id, INDEX_EXTENSION));

        let state = JobState::new(
            session_id.clone(),
            source_path.clone(),
            output_path.clone(),
            index_path.clone(),
            encoding,
            patterns.keep_keywords().to_vec(),
            patterns.exclude_keywords().to_vec(),
            source_bytes,
            self.config.assumed_avg_line_bytes,
        );
        let handle = self.registry.create(state);
        let plan = FilterPlan::new(
            source_path,
            output_path,
            index_path,
            encoding,
            patterns,
            &self.config,
        );

        if let Err(e) = spawn_filter_job(Arc::clone(&self.registry), handle, plan) {
            self.registry.delete(&session_id, true);
            return Err(e.into());
        }

        info!(session = %session_id, source = source_id, %encoding, "filter started");
        Ok(session_id)
    }

    /// Snapshot of a session. Unknown or superseded sessions report
    /// `no_job` rather than an error.
    pub fn poll_progress(&self, session_id: &str) -> Result<ProgressReport> {
        let Some(job) = self.registry.get(session_id) else {
            return Ok(ProgressReport::no_job(session_id));
        };

        let partial_content = if job.first_chunk_ready && job.status == JobStatus::Running {
            // The flushed prefix is never rewritten, so reading it while the
            // worker appends is safe.
            match read_lines(
                &job.output_path,
                None,
                job.encoding,
                1,
                self.config.first_chunk_lines,
            ) {
                Ok(window) => Some(window.content()),
                Err(e) => {
                    warn!(session = session_id, error = %e, "first chunk unreadable");
                    None
                }
            }
        } else {
            None
        };

        Ok(ProgressReport {
            session_id: job.session_id.clone(),
            status: job.status.into(),
            lines_written: job.lines_written,
            estimated_total_lines: job.estimated_total_lines,
            percent: job.percent(),
            first_chunk_ready: job.first_chunk_ready,
            partial_content,
            error_message: job.error_message,
        })
    }

    /// Lines `start_line..=end_line` of a finished session, capped at
    /// [`MAX_WINDOW_LINES`]
    pub fn get_window(&self, session_id: &str, start_line: u64, end_line: u64) -> Result<WindowResponse> {
        let job = self.finished_job(session_id)?;
        let start_line = start_line.max(1);
        let end_line = end_line.min(start_line.saturating_add(MAX_WINDOW_LINES - 1));

        let index = self.load_index(&job);
        let window = read_lines(&job.output_path, index.as_deref(), job.encoding, start_line, end_line)?;

        Ok(WindowResponse {
            end_line: window.last_line().unwrap_or(start_line - 1),
            start_line,
            content: window.content(),
            encoding: window.encoding.name().to_string(),
            total_lines: job.lines_written,
        })
    }

    /// Window of `size` lines centered on `center_line`
    pub fn get_window_around(
        &self,
        session_id: &str,
        center_line: u64,
        size: Option<u64>,
    ) -> Result<WindowResponse> {
        let job = self.finished_job(session_id)?;
        let size = size.unwrap_or(DEFAULT_WINDOW_LINES).min(MAX_WINDOW_LINES);
        let (start, end) = centered_range(center_line, size, job.lines_written);
        self.get_window(session_id, start, end)
    }

    pub fn search_next(
        &self,
        session_id: &str,
        keyword: &str,
        from_line: u64,
        case_sensitive: bool,
    ) -> Result<SearchResponse> {
        let job = self.finished_job(session_id)?;
        let index = self.load_index(&job);
        let match_line = search::search_next(
            &job.output_path,
            index.as_deref(),
            job.encoding,
            from_line,
            keyword,
            case_sensitive,
        )?;
        Ok(SearchResponse {
            match_line,
            total_lines: job.lines_written,
        })
    }

    pub fn search_prev(
        &self,
        session_id: &str,
        keyword: &str,
        before_line: u64,
        case_sensitive: bool,
    ) -> Result<SearchResponse> {
        let job = self.finished_job(session_id)?;
        let index = self.load_index(&job);
        let match_line = search::search_prev(
            &job.output_path,
            index.as_deref(),
            job.encoding,
            before_line,
            keyword,
            case_sensitive,
        )?;
        Ok(SearchResponse {
            match_line,
            total_lines: job.lines_written,
        })
    }

    /// Remove one session and its files
    pub fn clear_session(&self, session_id: &str) -> bool {
        self.cache().pop(session_id);
        self.registry.delete(session_id, true)
    }

    /// Remove every session and its files
    pub fn clear_all(&self) -> usize {
        self.cache().clear();
        self.registry.delete_all(true)
    }

    pub fn list_sources(&self) -> Result<Vec<SourceInfo>> {
        self.sources.list()
    }

    /// Sessions whose job has not reached a terminal state
    pub fn running_jobs(&self) -> usize {
        self.registry
            .session_ids()
            .iter()
            .filter_map(|id| self.registry.get(id))
            .filter(|job| job.status == JobStatus::Running)
            .count()
    }

    /// Delete artifacts left in the work directory by an earlier process
    pub fn sweep_stale_artifacts(&self) -> usize {
        let Ok(entries) = fs::read_dir(&self.config.work_dir) else {
            return 0;
        };

        let live = self.registry.session_ids();
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_artifact = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e, OUTPUT_EXTENSION | INDEX_EXTENSION | "tmp"));
            let is_live = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| live.iter().any(|id| n.starts_with(id.as_str())));

            if is_artifact && !is_live && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    fn finished_job(&self, session_id: &str) -> Result<JobState> {
        let job = self
            .registry
            .get(session_id)
            .ok_or_else(|| FilterError::NotFound(session_id.to_string()))?;
        match job.status {
            JobStatus::Finished => Ok(job),
            JobStatus::Running => Err(FilterError::NotReady(format!("{} is still running", session_id))),
            JobStatus::Error => Err(FilterError::NotReady(format!(
                "{} failed: {}",
                session_id,
                job.error_message.as_deref().unwrap_or("unknown error")
            ))),
        }
    }

    /// Cached index of a finished job. A missing or corrupt index is logged
    /// and browsing falls back to scanning from the top.
    fn load_index(&self, job: &JobState) -> Option<Arc<LineIndex>> {
        if let Some(index) = self.cache().get(&job.session_id) {
            return Some(Arc::clone(index));
        }

        match LineIndex::read_from(&job.index_path) {
            Ok(index) => {
                let index = Arc::new(index);
                self.cache().put(job.session_id.clone(), Arc::clone(&index));
                Some(index)
            }
            Err(e) => {
                warn!(session = %job.session_id, error = %e, "line index unusable, scanning linearly");
                None
            }
        }
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, LruCache<String, Arc<LineIndex>>> {
        self.index_cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for FilterService {
    fn drop(&mut self) {
        self.registry.delete_all(true);
    }
}
