//! Sparse line index and the windowed reader built on it.
//!
//! The filter job records a [`Checkpoint`] every `stride` output lines. The
//! reader seeks to the nearest checkpoint at or below the requested line and
//! scans forward from there, so any window costs at most `stride - 1` extra
//! line reads regardless of artifact size.

pub mod line_index;
pub mod window;

pub use line_index::{Checkpoint, LineIndex};
pub use window::{centered_range, read_lines, read_window, WindowText};
