//! Protocol messages for client-server communication
//!
//! Uses a simple length-prefixed JSON protocol:
//! - 4 bytes (little-endian u32): message length
//! - N bytes: JSON-encoded message

use crate::filter::JobStatus;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::PathBuf;

/// Largest message either side will accept
pub const MAX_MESSAGE_BYTES: usize = 100 * 1024 * 1024;

/// Request from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Start filtering a source; supersedes every existing session
    StartFilter {
        source_id: String,
        #[serde(default)]
        keep: Vec<String>,
        #[serde(default)]
        exclude: Vec<String>,
        /// Named keyword configurations merged before `keep`/`exclude`
        #[serde(default)]
        configs: Vec<String>,
    },

    /// Non-blocking progress snapshot
    PollProgress { session_id: String },

    /// Lines `start_line..=end_line` of a finished session
    GetWindow {
        session_id: String,
        start_line: u64,
        end_line: u64,
    },

    /// A window centered on one line (jump to line)
    GetWindowAround {
        session_id: String,
        center_line: u64,
        #[serde(default)]
        size: Option<u64>,
    },

    SearchNext {
        session_id: String,
        keyword: String,
        from_line: u64,
        #[serde(default)]
        case_sensitive: bool,
    },

    SearchPrev {
        session_id: String,
        keyword: String,
        before_line: u64,
        #[serde(default)]
        case_sensitive: bool,
    },

    /// Drop one session and its files
    ClearSession { session_id: String },

    /// Drop every session and its files
    ClearAll,

    /// Log files available for filtering
    ListSources,

    /// Check server health and get stats
    Status,

    /// Graceful shutdown request
    Shutdown,

    /// Ping for connection testing
    Ping,
}

/// Response from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Started { session_id: String },

    Progress(ProgressReport),

    Window(WindowResponse),

    Search(SearchResponse),

    Cleared { removed: usize },

    Sources { sources: Vec<SourceInfo> },

    /// Server status
    Status(StatusResponse),

    /// Shutdown acknowledged
    ShuttingDown,

    /// Pong response
    Pong,

    /// Error response; `kind` is the stable error tag
    Error { kind: String, message: String },
}

/// Session state as seen by a poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Unknown or superseded session
    NoJob,
    Running,
    Finished,
    Error,
}

impl SessionStatus {
    /// Pollers stop on anything but `Running`
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

impl From<JobStatus> for SessionStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Running => SessionStatus::Running,
            JobStatus::Finished => SessionStatus::Finished,
            JobStatus::Error => SessionStatus::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub session_id: String,
    pub status: SessionStatus,
    pub lines_written: u64,
    /// Approximate until the job finishes
    pub estimated_total_lines: u64,
    pub percent: f64,
    pub first_chunk_ready: bool,
    /// First chunk of output, only while running with the chunk latched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ProgressReport {
    pub fn no_job(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            status: SessionStatus::NoJob,
            lines_written: 0,
            estimated_total_lines: 0,
            percent: 0.0,
            first_chunk_ready: false,
            partial_content: None,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowResponse {
    /// Lines joined with `\n`
    pub content: String,
    pub encoding: String,
    pub total_lines: u64,
    pub start_line: u64,
    /// Last line returned; `start_line - 1` when the window is empty
    pub end_line: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub match_line: Option<u64>,
    pub total_lines: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub id: String,
    pub size_bytes: u64,
}

/// Server status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Server uptime in seconds
    pub uptime_secs: u64,
    /// Sessions currently registered
    pub sessions: Vec<String>,
    /// Sessions whose job is still running
    pub running_jobs: usize,
    /// Total requests served
    pub requests_served: u64,
    pub log_dir: PathBuf,
    pub work_dir: PathBuf,
}

/// Write a message to a stream with length prefix
pub fn write_message<W: Write>(writer: &mut W, msg: &impl Serialize) -> std::io::Result<()> {
    let json = serde_json::to_vec(msg).map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e)
    })?;

    if json.len() > MAX_MESSAGE_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Message too large",
        ));
    }

    let len = json.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&json)?;
    writer.flush()?;

    Ok(())
}

/// Read a message from a stream with length prefix
pub fn read_message<R: Read, T: for<'de> Deserialize<'de>>(reader: &mut R) -> std::io::Result<T> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Message too large",
        ));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;

    serde_json::from_slice(&buf).map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e)
    })
}

/// Whether a [`read_message`] error came from a complete frame whose payload
/// did not parse. The stream is still in sync after such an error; after any
/// other it is not.
pub fn is_malformed_payload(err: &std::io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<serde_json::Error>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_only_bad_payloads_are_recoverable() {
        let mut frame = 5u32.to_le_bytes().to_vec();
        frame.extend_from_slice(b"{oops");
        let err = read_message::<_, Request>(&mut Cursor::new(frame)).unwrap_err();
        assert!(is_malformed_payload(&err));

        let oversized = u32::MAX.to_le_bytes().to_vec();
        let err = read_message::<_, Request>(&mut Cursor::new(oversized)).unwrap_err();
        assert!(!is_malformed_payload(&err));

        let err = read_message::<_, Request>(&mut Cursor::new(vec![1u8, 0])).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
        assert!(!is_malformed_payload(&err));
    }

    #[test]
    fn test_roundtrip_request() {
        let req = Request::StartFilter {
            source_id: "app.log".to_string(),
            keep: vec!["ERROR".to_string()],
            exclude: vec!["DEBUG".to_string()],
            configs: Vec::new(),
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &req).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: Request = read_message(&mut cursor).unwrap();

        match decoded {
            Request::StartFilter { source_id, keep, exclude, configs } => {
                assert_eq!(source_id, "app.log");
                assert_eq!(keep, vec!["ERROR"]);
                assert_eq!(exclude, vec!["DEBUG"]);
                assert!(configs.is_empty());
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_roundtrip_progress() {
        let resp = Response::Progress(ProgressReport {
            partial_content: Some("a\nb".to_string()),
            lines_written: 200,
            first_chunk_ready: true,
            status: SessionStatus::Running,
            ..ProgressReport::no_job("s1")
        });

        let mut buf = Vec::new();
        write_message(&mut buf, &resp).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: Response = read_message(&mut cursor).unwrap();

        match decoded {
            Response::Progress(report) => {
                assert_eq!(report.session_id, "s1");
                assert_eq!(report.status, SessionStatus::Running);
                assert_eq!(report.partial_content.as_deref(), Some("a\nb"));
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_wire_shape_is_tagged() {
        let json = serde_json::to_value(Request::PollProgress {
            session_id: "x".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "PollProgress");

        // Optional fields may be left out by clients
        let req: Request =
            serde_json::from_str(r#"{"type":"SearchNext","session_id":"x","keyword":"k","from_line":3}"#)
                .unwrap();
        assert!(matches!(req, Request::SearchNext { case_sensitive: false, .. }));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_MESSAGE_BYTES as u32 + 1).to_le_bytes());
        let err = read_message::<_, Request>(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
