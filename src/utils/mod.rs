//! Utility functions shared across the crate.
//!
//! - [`app_data`] - Configuration file in the app data directory
//! - [`progress`] - Progress bar (no-op without the `progress` feature)
//! - [`text_encoding`] - Encoding detection and lossy decoding
//! - [`varint`] - Variable-length integers and little-endian helpers

pub mod app_data;
pub mod progress;
pub mod text_encoding;
pub mod varint;

pub use app_data::*;
pub use text_encoding::*;
pub use varint::*;

/// Strip one trailing `\n` and then one trailing `\r`
#[inline]
pub fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
