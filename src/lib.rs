//! # logsieve - keyword filtering and paging for large log files
//!
//! logsieve streams a log through keep/exclude keyword patterns in a
//! background job, writes the surviving lines to an output artifact, and
//! records a sparse line index next to it so any window of the result can be
//! served without rescanning from the top.
//!
//! ## Architecture
//!
//! - [`filter`] - Pattern compilation, keyword configs, the filter job, and the job registry
//! - [`index`] - Sparse line index and windowed reads over output artifacts
//! - [`search`] - Next/previous keyword search inside a finished output
//! - [`server`] - Filter service, Unix-socket daemon, client, and progress poller
//! - [`output`] - Terminal rendering of windows and search hits
//! - [`utils`] - Encoding detection, config, progress bars, varints
//!
//! ## Quick Start
//!
//! ```ignore
//! use logsieve::server::{poll_until_done, FilterService};
//! use logsieve::utils::AppConfig;
//!
//! let mut service = FilterService::new(AppConfig::load()?)?;
//! let session = service.start_filter("app.log", &["ERROR".into()], &["DEBUG".into()])?;
//!
//! let interval = service.config().poll_interval();
//! poll_until_done(&mut service, &session, interval, |_| {})?;
//!
//! let window = service.get_window(&session, 1, 50)?;
//! println!("{}", window.content);
//! ```

pub mod error;
pub mod filter;
pub mod index;
pub mod logging;
pub mod output;
pub mod search;
pub mod server;
pub mod utils;
