//! Streaming filter worker.
//!
//! One job reads its source line by line, appends surviving lines to the
//! output artifact verbatim, records index checkpoints as it goes, and
//! publishes progress into the registry. Nothing larger than a single line
//! is held in memory.

use crate::error::{FilterError, Result};
use crate::filter::pattern::PatternSet;
use crate::filter::registry::{remove_if_exists, JobHandle, JobRegistry, JobUpdate};
use crate::index::LineIndex;
use crate::utils::{trim_line_ending, AppConfig, DetectedEncoding};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info};

/// Buffer size for both the source reader and the artifact writer
const IO_BUFFER_SIZE: usize = 256 * 1024;

/// Everything a worker needs, fixed at job start
#[derive(Debug, Clone)]
pub struct FilterPlan {
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    pub index_path: PathBuf,
    pub encoding: DetectedEncoding,
    pub patterns: PatternSet,
    pub index_stride: u32,
    pub first_chunk_lines: u64,
    pub progress_tick_lines: u64,
}

impl FilterPlan {
    pub fn new(
        source_path: PathBuf,
        output_path: PathBuf,
        index_path: PathBuf,
        encoding: DetectedEncoding,
        patterns: PatternSet,
        config: &AppConfig,
    ) -> Self {
        Self {
            source_path,
            output_path,
            index_path,
            encoding,
            patterns,
            index_stride: config.index_stride.max(1),
            first_chunk_lines: config.first_chunk_lines.max(1),
            progress_tick_lines: config.progress_tick_lines.max(1),
        }
    }
}

/// Final counters of a completed scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterOutcome {
    pub lines_written: u64,
    pub lines_scanned: u64,
    pub bytes_scanned: u64,
}

/// Run the job on a dedicated named thread. The caller may drop the join
/// handle to detach it.
pub fn spawn_filter_job(
    registry: Arc<JobRegistry>,
    handle: JobHandle,
    plan: FilterPlan,
) -> std::io::Result<JoinHandle<Result<FilterOutcome>>> {
    let id = handle.session_id();
    let name = format!("logsieve-job-{}", id.get(..8).unwrap_or(id));

    thread::Builder::new()
        .name(name)
        .spawn(move || run_filter_job(&registry, &handle, &plan))
}

/// Run the job to completion on the current thread and publish its terminal
/// state.
pub fn run_filter_job(
    registry: &JobRegistry,
    handle: &JobHandle,
    plan: &FilterPlan,
) -> Result<FilterOutcome> {
    let session = handle.session_id();
    let start = Instant::now();
    info!(
        session,
        source = %plan.source_path.display(),
        encoding = %plan.encoding,
        keep = ?plan.patterns.keep_keywords(),
        exclude = ?plan.patterns.exclude_keywords(),
        "filter job started"
    );

    let result = filter_stream(registry, handle, plan);

    match &result {
        Ok(outcome) => {
            let update = JobUpdate::progress(
                outcome.lines_written,
                outcome.lines_scanned,
                outcome.bytes_scanned,
            )
            .finished();
            if registry.update(session, update) {
                info!(
                    session,
                    lines_written = outcome.lines_written,
                    lines_scanned = outcome.lines_scanned,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "filter job finished"
                );
            } else {
                debug!(session, "job removed before finishing, deleting artifacts");
                discard_artifacts(plan);
            }
        }
        Err(FilterError::JobCancelled) => {
            info!(session, "filter job cancelled");
            if registry.get(session).is_none() {
                discard_artifacts(plan);
            }
        }
        Err(e) => {
            error!(session, error = %e, "filter job failed");
            if !registry.update(session, JobUpdate::failed(e.to_string())) {
                discard_artifacts(plan);
            }
        }
    }

    result
}

fn filter_stream(
    registry: &JobRegistry,
    handle: &JobHandle,
    plan: &FilterPlan,
) -> Result<FilterOutcome> {
    let session = handle.session_id();
    let source = File::open(&plan.source_path)?;
    let mut reader = BufReader::with_capacity(IO_BUFFER_SIZE, source);
    let mut writer = BufWriter::with_capacity(IO_BUFFER_SIZE, File::create(&plan.output_path)?);
    let mut index = LineIndex::new(plan.index_stride, plan.encoding);

    let mut outcome = FilterOutcome {
        lines_written: 0,
        lines_scanned: 0,
        bytes_scanned: 0,
    };
    let mut first_chunk_ready = false;
    let mut output_offset: u64 = 0;
    let mut buf = Vec::with_capacity(4096);

    loop {
        if handle.is_cancelled() {
            return Err(FilterError::JobCancelled);
        }

        buf.clear();
        let read = reader.read_until(b'\n', &mut buf)?;
        if read == 0 {
            break;
        }
        outcome.lines_scanned += 1;
        outcome.bytes_scanned += read as u64;

        if plan.patterns.accepts(trim_line_ending(&buf)) {
            outcome.lines_written += 1;
            index.observe_line(outcome.lines_written, output_offset);
            writer.write_all(&buf)?;
            output_offset += read as u64;
        }

        if !first_chunk_ready && outcome.lines_written >= plan.first_chunk_lines {
            // Readers may open the artifact as soon as the latch is visible
            writer.flush()?;
            first_chunk_ready = true;
            registry.update(session, progress_update(&outcome).first_chunk_ready());
            debug!(session, lines = outcome.lines_written, "first chunk ready");
        } else if outcome.lines_scanned % plan.progress_tick_lines == 0 {
            registry.update(session, progress_update(&outcome));
        }
    }

    writer.flush()?;
    drop(writer);

    if handle.is_cancelled() {
        return Err(FilterError::JobCancelled);
    }

    index.write_to(&plan.index_path)?;
    Ok(outcome)
}

fn progress_update(outcome: &FilterOutcome) -> JobUpdate {
    JobUpdate::progress(
        outcome.lines_written,
        outcome.lines_scanned,
        outcome.bytes_scanned,
    )
}

fn discard_artifacts(plan: &FilterPlan) {
    remove_if_exists(&plan.output_path);
    remove_if_exists(&plan.index_path);
}
