//! Unix filter daemon
//!
//! Owns one [`FilterService`] and serves it over a Unix socket, one thread
//! per connection. Requests never wait for a job; clients poll.

use crate::server::protocol::{
    is_malformed_payload, read_message, write_message, Request, Response, StatusResponse,
};
use crate::server::service::FilterService;
use crate::server::{get_pid_path, get_socket_path};
use crate::utils::AppConfig;
use anyhow::{Context, Result};
use std::fs;
use std::io::{BufReader, BufWriter};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Connection timeout
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Log file of the detached daemon, inside the work directory
const DAEMON_LOG_FILE: &str = "daemon.log";

/// Statistics for the server
struct ServerStats {
    start_time: Instant,
    requests_served: AtomicU64,
}

impl ServerStats {
    fn new() -> Self {
        Self {
            start_time: Instant::now(),
            requests_served: AtomicU64::new(0),
        }
    }
}

/// The filter daemon
pub struct SieveServer {
    service: FilterService,
    stats: ServerStats,
    shutdown: AtomicBool,
    socket_path: PathBuf,
    pid_path: PathBuf,
}

impl SieveServer {
    /// Server on the default socket and pid paths
    pub fn new(service: FilterService) -> Arc<Self> {
        Self::with_paths(service, get_socket_path(), get_pid_path())
    }

    pub fn with_paths(service: FilterService, socket_path: PathBuf, pid_path: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            service,
            stats: ServerStats::new(),
            shutdown: AtomicBool::new(false),
            socket_path,
            pid_path,
        })
    }

    /// Start the server (blocking)
    pub fn run(self: &Arc<Self>) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = self.socket_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Remove stale socket file
        if self.socket_path.exists() {
            fs::remove_file(&self.socket_path)?;
        }

        fs::write(&self.pid_path, format!("{}", std::process::id()))?;

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind to {}", self.socket_path.display()))?;

        // Set socket permissions (user only)
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.socket_path, fs::Permissions::from_mode(0o600))?;
        }

        let swept = self.service.sweep_stale_artifacts();
        if swept > 0 {
            info!(swept, "removed artifacts from a previous run");
        }

        info!(socket = %self.socket_path.display(), "listening");

        for stream in listener.incoming() {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            match stream {
                Ok(stream) => {
                    let _ = stream.set_read_timeout(Some(CONNECTION_TIMEOUT));
                    let _ = stream.set_write_timeout(Some(CONNECTION_TIMEOUT));

                    let server = Arc::clone(self);
                    thread::spawn(move || {
                        if let Err(e) = server.handle_connection(stream) {
                            debug!(error = %e, "connection closed with error");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            }
        }

        let removed = self.service.clear_all();
        info!(removed, "shutting down");

        let _ = fs::remove_file(&self.socket_path);
        let _ = fs::remove_file(&self.pid_path);

        Ok(())
    }

    /// Handle a single client connection
    fn handle_connection(&self, stream: UnixStream) -> Result<()> {
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut writer = BufWriter::new(stream);

        loop {
            let request: Request = match read_message(&mut reader) {
                Ok(req) => req,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    // Client disconnected
                    break;
                }
                Err(e) if is_malformed_payload(&e) => {
                    write_message(&mut writer, &invalid_request(&e))?;
                    continue;
                }
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    // Oversized frame: the body was never consumed, so the
                    // stream cannot be re-framed
                    let _ = write_message(&mut writer, &invalid_request(&e));
                    debug!(error = %e, "dropping connection after bad frame");
                    break;
                }
                Err(e) => {
                    // Idle timeout or a broken stream
                    debug!(error = %e, "dropping connection");
                    break;
                }
            };

            let response = self.handle_request(request);
            write_message(&mut writer, &response)?;

            if matches!(response, Response::ShuttingDown) {
                // Wake the accept loop so it observes the flag
                let _ = UnixStream::connect(&self.socket_path);
                break;
            }
        }

        Ok(())
    }

    /// Handle a single request
    pub fn handle_request(&self, request: Request) -> Response {
        self.stats.requests_served.fetch_add(1, Ordering::Relaxed);
        let service = &self.service;

        let result = match request {
            Request::StartFilter {
                source_id,
                keep,
                exclude,
                configs,
            } => service
                .resolve_keywords(&configs, &keep, &exclude)
                .and_then(|keywords| service.start_filter(&source_id, &keywords.keep, &keywords.exclude))
                .map(|session_id| Response::Started { session_id }),

            Request::PollProgress { session_id } => {
                service.poll_progress(&session_id).map(Response::Progress)
            }

            Request::GetWindow {
                session_id,
                start_line,
                end_line,
            } => service
                .get_window(&session_id, start_line, end_line)
                .map(Response::Window),

            Request::GetWindowAround {
                session_id,
                center_line,
                size,
            } => service
                .get_window_around(&session_id, center_line, size)
                .map(Response::Window),

            Request::SearchNext {
                session_id,
                keyword,
                from_line,
                case_sensitive,
            } => service
                .search_next(&session_id, &keyword, from_line, case_sensitive)
                .map(Response::Search),

            Request::SearchPrev {
                session_id,
                keyword,
                before_line,
                case_sensitive,
            } => service
                .search_prev(&session_id, &keyword, before_line, case_sensitive)
                .map(Response::Search),

            Request::ClearSession { session_id } => Ok(Response::Cleared {
                removed: usize::from(service.clear_session(&session_id)),
            }),

            Request::ClearAll => Ok(Response::Cleared {
                removed: service.clear_all(),
            }),

            Request::ListSources => service
                .list_sources()
                .map(|sources| Response::Sources { sources }),

            Request::Status => Ok(self.status()),

            Request::Shutdown => {
                self.shutdown.store(true, Ordering::Relaxed);
                Ok(Response::ShuttingDown)
            }

            Request::Ping => Ok(Response::Pong),
        };

        result.unwrap_or_else(|e| {
            debug!(kind = e.kind(), error = %e, "request failed");
            Response::Error {
                kind: e.kind().to_string(),
                message: e.to_string(),
            }
        })
    }

    fn status(&self) -> Response {
        let config = self.service.config();
        Response::Status(StatusResponse {
            uptime_secs: self.stats.start_time.elapsed().as_secs(),
            sessions: self.service.registry().session_ids(),
            running_jobs: self.service.running_jobs(),
            requests_served: self.stats.requests_served.load(Ordering::Relaxed),
            log_dir: config.log_dir.clone(),
            work_dir: config.work_dir.clone(),
        })
    }
}

fn invalid_request(err: &std::io::Error) -> Response {
    Response::Error {
        kind: "invalid_request".to_string(),
        message: format!("Invalid request: {}", err),
    }
}

/// Daemonize the current process
///
/// Relative directories in `config` must already be absolute: the daemon
/// changes to `/`.
pub fn daemonize(config: AppConfig) -> Result<()> {
    // Fork using double-fork technique for proper daemonization
    match unsafe { libc::fork() } {
        -1 => anyhow::bail!("First fork failed"),
        0 => {
            // Child process: new session
            if unsafe { libc::setsid() } == -1 {
                anyhow::bail!("setsid failed");
            }

            // Second fork to prevent acquiring a controlling terminal
            match unsafe { libc::fork() } {
                -1 => anyhow::bail!("Second fork failed"),
                0 => {
                    // Grandchild - this becomes the daemon
                    unsafe {
                        libc::close(0);
                        libc::close(1);
                        libc::close(2);

                        // Redirect to /dev/null
                        let null = libc::open(
                            c"/dev/null".as_ptr(),
                            libc::O_RDWR,
                        );
                        if null != -1 {
                            libc::dup2(null, 0);
                            libc::dup2(null, 1);
                            libc::dup2(null, 2);
                            if null > 2 {
                                libc::close(null);
                            }
                        }
                    }

                    // Change to root directory to avoid holding mounts
                    let _ = std::env::set_current_dir("/");

                    let log_path = config.work_dir.join(DAEMON_LOG_FILE);
                    if let Err(e) = crate::logging::init_file(&log_path, "info") {
                        let _ = fs::write(error_log_path(), format!("{}", e));
                    }

                    if let Err(e) = run_with_config(config) {
                        error!(error = %e, "daemon failed");
                        let _ = fs::write(error_log_path(), format!("{:#}", e));
                    }
                    std::process::exit(0);
                }
                _ => {
                    // First child exits immediately
                    std::process::exit(0);
                }
            }
        }
        _ => {
            // Parent process - wait for first child then exit
            unsafe {
                let mut status: libc::c_int = 0;
                libc::wait(&mut status);
            }
            Ok(())
        }
    }
}

/// Where a daemon that cannot log reports why it died
pub fn error_log_path() -> PathBuf {
    std::env::temp_dir().join("logsieve-error.log")
}

/// Start the daemon in foreground (for debugging)
pub fn run_foreground(config: AppConfig) -> Result<()> {
    run_with_config(config)
}

fn run_with_config(config: AppConfig) -> Result<()> {
    let service = FilterService::new(config).context("Failed to set up filter service")?;
    let server = SieveServer::new(service);
    server.run()
}

/// Stop the running daemon
pub fn stop_daemon() -> Result<bool> {
    let pid_path = get_pid_path();

    if !pid_path.exists() {
        return Ok(false);
    }

    let pid_str = fs::read_to_string(&pid_path)?;
    let pid: i32 = pid_str.trim().parse()?;

    // Send SIGTERM
    unsafe {
        if libc::kill(pid, libc::SIGTERM) == 0 {
            // Wait a bit for graceful shutdown
            thread::sleep(Duration::from_millis(500));

            // Check if still running, send SIGKILL if needed
            if libc::kill(pid, 0) == 0 {
                thread::sleep(Duration::from_secs(1));
                if libc::kill(pid, 0) == 0 {
                    libc::kill(pid, libc::SIGKILL);
                }
            }
        }
    }

    let _ = fs::remove_file(get_socket_path());
    let _ = fs::remove_file(&pid_path);

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::protocol::SessionStatus;
    use tempfile::tempdir;

    fn server(root: &std::path::Path) -> Arc<SieveServer> {
        let config = AppConfig {
            log_dir: root.join("logs"),
            work_dir: root.join("work"),
            keyword_config_dir: root.join("configs"),
            ..AppConfig::default()
        };
        fs::create_dir_all(&config.log_dir).unwrap();
        let service = FilterService::new(config).unwrap();
        SieveServer::with_paths(service, root.join("s.sock"), root.join("s.pid"))
    }

    #[test]
    fn test_errors_carry_kind() {
        let dir = tempdir().unwrap();
        let server = server(dir.path());

        let response = server.handle_request(Request::StartFilter {
            source_id: "missing.log".to_string(),
            keep: Vec::new(),
            exclude: Vec::new(),
            configs: Vec::new(),
        });
        match response {
            Response::Error { kind, .. } => assert_eq!(kind, "source_not_found"),
            other => panic!("unexpected response: {:?}", other),
        }

        let response = server.handle_request(Request::GetWindow {
            session_id: "ghost".to_string(),
            start_line: 1,
            end_line: 2,
        });
        assert!(matches!(response, Response::Error { ref kind, .. } if kind == "not_found"));
    }

    #[test]
    fn test_unknown_session_polls_as_no_job() {
        let dir = tempdir().unwrap();
        let server = server(dir.path());

        let response = server.handle_request(Request::PollProgress {
            session_id: "ghost".to_string(),
        });
        match response {
            Response::Progress(report) => assert_eq!(report.status, SessionStatus::NoJob),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_status_and_housekeeping() {
        let dir = tempdir().unwrap();
        let server = server(dir.path());

        assert!(matches!(server.handle_request(Request::Ping), Response::Pong));
        assert!(matches!(
            server.handle_request(Request::ClearAll),
            Response::Cleared { removed: 0 }
        ));
        match server.handle_request(Request::Status) {
            Response::Status(status) => {
                assert_eq!(status.requests_served, 3);
                assert!(status.sessions.is_empty());
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }
}
