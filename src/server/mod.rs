//! Filter daemon, its client, and the service both sides share
//!
//! Architecture:
//! - `FilterService`: registry of filter jobs plus window/search handlers
//! - Daemon: serves a `FilterService` over a Unix socket
//! - Client: connects to the socket and issues requests
//! - Fallback: without a daemon the CLI drives a `FilterService` in-process

pub mod client;
pub mod daemon;
pub mod poller;
pub mod protocol;
pub mod service;
pub mod sources;

pub use client::{ClientError, SieveClient};
pub use poller::{poll_until_done, PollEvent, ProgressSource};
pub use service::FilterService;
pub use sources::{LogDirectory, SourceResolver};

use std::path::PathBuf;

/// Get the socket path for the filter daemon
/// Uses a per-user runtime directory for security
pub fn get_socket_path() -> PathBuf {
    runtime_path("logsieve.sock")
}

/// Get the PID file path for the daemon
pub fn get_pid_path() -> PathBuf {
    runtime_path("logsieve.pid")
}

fn runtime_path(file_name: &str) -> PathBuf {
    // XDG_RUNTIME_DIR first (tmpfs-backed, per user)
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(file_name);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".local").join("run").join(file_name);
    }

    // Last resort: /tmp with user ID
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/logsieve-{}-{}", uid, file_name))
}

/// Check if the daemon is running
pub fn is_daemon_running() -> bool {
    let Ok(pid_str) = std::fs::read_to_string(get_pid_path()) else {
        return false;
    };

    match pid_str.trim().parse::<i32>() {
        // kill(pid, 0) probes for existence without sending a signal
        Ok(pid) => unsafe { libc::kill(pid, 0) == 0 },
        Err(_) => false,
    }
}
