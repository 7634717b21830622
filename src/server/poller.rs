//! Client-side polling loop.
//!
//! A poller re-issues a non-blocking progress request on a fixed interval
//! until the session leaves `Running`, handing the first chunk of output to
//! the caller as soon as it becomes available.

use crate::server::client::SieveClient;
use crate::server::protocol::ProgressReport;
use crate::server::service::FilterService;
use anyhow::Result;
use std::thread;
use std::time::Duration;

/// Anything that can answer a progress poll
pub trait ProgressSource {
    fn poll_progress(&mut self, session_id: &str) -> Result<ProgressReport>;
}

impl ProgressSource for FilterService {
    fn poll_progress(&mut self, session_id: &str) -> Result<ProgressReport> {
        Ok(FilterService::poll_progress(self, session_id)?)
    }
}

impl ProgressSource for SieveClient {
    fn poll_progress(&mut self, session_id: &str) -> Result<ProgressReport> {
        Ok(SieveClient::poll_progress(self, session_id)?)
    }
}

/// What the poller reports back on each round
#[derive(Debug)]
pub enum PollEvent<'a> {
    /// Every poll, including the last one
    Progress(&'a ProgressReport),
    /// First chunk of output; emitted at most once
    FirstChunk(&'a str),
}

/// Poll until the session is finished, failed, or gone. Returns the last
/// report.
pub fn poll_until_done<S, F>(
    source: &mut S,
    session_id: &str,
    interval: Duration,
    mut on_event: F,
) -> Result<ProgressReport>
where
    S: ProgressSource + ?Sized,
    F: FnMut(PollEvent<'_>),
{
    let mut chunk_delivered = false;

    loop {
        let report = source.poll_progress(session_id)?;

        if !chunk_delivered && let Some(chunk) = report.partial_content.as_deref() {
            chunk_delivered = true;
            on_event(PollEvent::FirstChunk(chunk));
        }
        on_event(PollEvent::Progress(&report));

        if report.status.is_terminal() {
            return Ok(report);
        }
        thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::protocol::SessionStatus;
    use std::collections::VecDeque;

    /// Replays canned reports
    struct Script(VecDeque<ProgressReport>);

    impl ProgressSource for Script {
        fn poll_progress(&mut self, session_id: &str) -> Result<ProgressReport> {
            Ok(self
                .0
                .pop_front()
                .unwrap_or_else(|| ProgressReport::no_job(session_id)))
        }
    }

    fn report(status: SessionStatus, lines: u64, chunk: Option<&str>) -> ProgressReport {
        ProgressReport {
            status,
            lines_written: lines,
            first_chunk_ready: chunk.is_some(),
            partial_content: chunk.map(str::to_string),
            ..ProgressReport::no_job("s")
        }
    }

    #[test]
    fn test_polls_until_terminal_and_delivers_chunk_once() {
        let mut script = Script(VecDeque::from(vec![
            report(SessionStatus::Running, 10, None),
            report(SessionStatus::Running, 200, Some("first")),
            report(SessionStatus::Running, 400, Some("first")),
            report(SessionStatus::Finished, 500, None),
        ]));

        let mut chunks = Vec::new();
        let mut seen = Vec::new();
        let last = poll_until_done(&mut script, "s", Duration::ZERO, |event| match event {
            PollEvent::FirstChunk(chunk) => chunks.push(chunk.to_string()),
            PollEvent::Progress(r) => seen.push(r.lines_written),
        })
        .unwrap();

        assert_eq!(last.status, SessionStatus::Finished);
        assert_eq!(chunks, vec!["first"]);
        assert_eq!(seen, vec![10, 200, 400, 500]);
    }

    #[test]
    fn test_vanished_session_stops_polling() {
        let mut script = Script(VecDeque::new());
        let last = poll_until_done(&mut script, "gone", Duration::ZERO, |_| {}).unwrap();
        assert_eq!(last.status, SessionStatus::NoJob);
    }
}
