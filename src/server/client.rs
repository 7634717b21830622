//! Client for connecting to the filter daemon

use crate::server::get_socket_path;
use crate::server::protocol::{
    read_message, write_message, ProgressReport, Request, Response, SearchResponse, SourceInfo,
    StatusResponse, WindowResponse,
};
use std::io::{BufReader, BufWriter};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

/// Read/write timeout
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in client operations
#[derive(Debug)]
pub enum ClientError {
    /// Server is not running
    NotRunning,
    /// Communication error
    IoError(std::io::Error),
    /// Server returned an error, with its error tag
    ServerError { kind: String, message: String },
    /// Invalid response
    InvalidResponse,
}

impl ClientError {
    /// Error tag reported by the server, if any
    pub fn kind(&self) -> Option<&str> {
        match self {
            ClientError::ServerError { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::NotRunning => write!(f, "Filter daemon is not running"),
            ClientError::IoError(e) => write!(f, "I/O error: {}", e),
            ClientError::ServerError { message, .. } => write!(f, "Server error: {}", message),
            ClientError::InvalidResponse => write!(f, "Invalid response from server"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::IoError(e)
    }
}

/// Client for the filter daemon
pub struct SieveClient {
    reader: BufReader<UnixStream>,
    writer: BufWriter<UnixStream>,
}

impl SieveClient {
    /// Try to connect to the running daemon
    /// Returns None if daemon is not running (allowing fallback to in-process mode)
    pub fn connect() -> Option<Self> {
        Self::connect_to(&get_socket_path())
    }

    /// Connect to a daemon listening on `socket_path`
    pub fn connect_to(socket_path: &Path) -> Option<Self> {
        // Quick check if socket exists
        if !socket_path.exists() {
            return None;
        }

        let stream = UnixStream::connect(socket_path).ok()?;

        let _ = stream.set_read_timeout(Some(IO_TIMEOUT));
        let _ = stream.set_write_timeout(Some(IO_TIMEOUT));

        let reader = BufReader::new(stream.try_clone().ok()?);
        let writer = BufWriter::new(stream);

        Some(Self { reader, writer })
    }

    /// Connect or return an error (for when daemon is required)
    pub fn connect_required() -> ClientResult<Self> {
        Self::connect().ok_or(ClientError::NotRunning)
    }

    fn call(&mut self, request: &Request) -> ClientResult<Response> {
        write_message(&mut self.writer, request)?;
        let response: Response = read_message(&mut self.reader)?;
        match response {
            Response::Error { kind, message } => Err(ClientError::ServerError { kind, message }),
            other => Ok(other),
        }
    }

    /// Start a filter job; returns the session id
    pub fn start_filter(
        &mut self,
        source_id: &str,
        keep: &[String],
        exclude: &[String],
        configs: &[String],
    ) -> ClientResult<String> {
        let request = Request::StartFilter {
            source_id: source_id.to_string(),
            keep: keep.to_vec(),
            exclude: exclude.to_vec(),
            configs: configs.to_vec(),
        };
        match self.call(&request)? {
            Response::Started { session_id } => Ok(session_id),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    pub fn poll_progress(&mut self, session_id: &str) -> ClientResult<ProgressReport> {
        let request = Request::PollProgress {
            session_id: session_id.to_string(),
        };
        match self.call(&request)? {
            Response::Progress(report) => Ok(report),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    pub fn get_window(
        &mut self,
        session_id: &str,
        start_line: u64,
        end_line: u64,
    ) -> ClientResult<WindowResponse> {
        let request = Request::GetWindow {
            session_id: session_id.to_string(),
            start_line,
            end_line,
        };
        match self.call(&request)? {
            Response::Window(window) => Ok(window),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    pub fn get_window_around(
        &mut self,
        session_id: &str,
        center_line: u64,
        size: Option<u64>,
    ) -> ClientResult<WindowResponse> {
        let request = Request::GetWindowAround {
            session_id: session_id.to_string(),
            center_line,
            size,
        };
        match self.call(&request)? {
            Response::Window(window) => Ok(window),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    pub fn search_next(
        &mut self,
        session_id: &str,
        keyword: &str,
        from_line: u64,
        case_sensitive: bool,
    ) -> ClientResult<SearchResponse> {
        let request = Request::SearchNext {
            session_id: session_id.to_string(),
            keyword: keyword.to_string(),
            from_line,
            case_sensitive,
        };
        match self.call(&request)? {
            Response::Search(result) => Ok(result),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    pub fn search_prev(
        &mut self,
        session_id: &str,
        keyword: &str,
        before_line: u64,
        case_sensitive: bool,
    ) -> ClientResult<SearchResponse> {
        let request = Request::SearchPrev {
            session_id: session_id.to_string(),
            keyword: keyword.to_string(),
            before_line,
            case_sensitive,
        };
        match self.call(&request)? {
            Response::Search(result) => Ok(result),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Drop one session, or all of them when `session_id` is None.
    /// Returns how many were removed.
    pub fn clear(&mut self, session_id: Option<&str>) -> ClientResult<usize> {
        let request = match session_id {
            Some(id) => Request::ClearSession {
                session_id: id.to_string(),
            },
            None => Request::ClearAll,
        };
        match self.call(&request)? {
            Response::Cleared { removed } => Ok(removed),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    pub fn list_sources(&mut self) -> ClientResult<Vec<SourceInfo>> {
        match self.call(&Request::ListSources)? {
            Response::Sources { sources } => Ok(sources),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Get server status
    pub fn status(&mut self) -> ClientResult<StatusResponse> {
        match self.call(&Request::Status)? {
            Response::Status(status) => Ok(status),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Request graceful shutdown
    pub fn shutdown(&mut self) -> ClientResult<()> {
        match self.call(&Request::Shutdown)? {
            Response::ShuttingDown => Ok(()),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Ping the server
    pub fn ping(&mut self) -> ClientResult<()> {
        match self.call(&Request::Ping)? {
            Response::Pong => Ok(()),
            _ => Err(ClientError::InvalidResponse),
        }
    }
}
