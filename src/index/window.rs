//! Random-access line windows over a finished output artifact.

use crate::index::line_index::{Checkpoint, LineIndex};
use crate::utils::{trim_line_ending, DetectedEncoding};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use tracing::warn;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Decoded lines `first_line..first_line + lines.len()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowText {
    pub lines: Vec<String>,
    pub encoding: DetectedEncoding,
    pub first_line: u64,
    /// Line the scan started from (the checkpoint used for the seek)
    pub scanned_from_line: u64,
}

impl WindowText {
    /// Last line number in the window, if any
    pub fn last_line(&self) -> Option<u64> {
        if self.lines.is_empty() {
            None
        } else {
            Some(self.first_line + self.lines.len() as u64 - 1)
        }
    }

    /// Lines joined with `\n`
    pub fn content(&self) -> String {
        self.lines.join("\n")
    }
}

/// Read lines `start..=end` (1-based). `start` is clamped to at least 1,
/// `start > end` yields nothing, and an `end` past EOF yields fewer lines.
///
/// With an index the scan begins at the greatest checkpoint `<= start`;
/// without one it begins at the top of the file.
pub fn read_lines(
    output_path: &Path,
    index: Option<&LineIndex>,
    fallback_encoding: DetectedEncoding,
    start: u64,
    end: u64,
) -> io::Result<WindowText> {
    let encoding = index.map_or(fallback_encoding, LineIndex::encoding);
    let start = start.max(1);
    let checkpoint = index.map_or(Checkpoint::START, |idx| idx.checkpoint_for(start));

    let mut window = WindowText {
        lines: Vec::new(),
        encoding,
        first_line: start,
        scanned_from_line: checkpoint.line,
    };
    if start > end {
        return Ok(window);
    }

    let mut file = File::open(output_path)?;
    file.seek(SeekFrom::Start(checkpoint.offset))?;
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

    let mut buf = Vec::with_capacity(256);
    let mut line_no = checkpoint.line;
    while line_no <= end {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        if line_no >= start {
            window
                .lines
                .push(encoding.decode_lossy(trim_line_ending(&buf)).into_owned());
        }
        line_no += 1;
    }

    Ok(window)
}

/// Like [`read_lines`], loading the index from `index_path`. A missing or
/// corrupt index degrades to a scan from the top of the file.
pub fn read_window(
    output_path: &Path,
    index_path: &Path,
    fallback_encoding: DetectedEncoding,
    start: u64,
    end: u64,
) -> io::Result<WindowText> {
    match LineIndex::read_from(index_path) {
        Ok(index) => read_lines(output_path, Some(&index), fallback_encoding, start, end),
        Err(e) => {
            warn!(index = %index_path.display(), error = %e, "line index unusable, scanning linearly");
            read_lines(output_path, None, fallback_encoding, start, end)
        }
    }
}

/// Inclusive range of `size` lines centered on `center`, clamped to
/// `1..=total`. Returns `(1, 0)` for an empty artifact.
pub fn centered_range(center: u64, size: u64, total: u64) -> (u64, u64) {
    if total == 0 {
        return (1, 0);
    }

    let size = size.clamp(1, total);
    let center = center.clamp(1, total);
    let mut start = center.saturating_sub(size / 2).max(1);
    let mut end = start + size - 1;
    if end > total {
        end = total;
        start = end - size + 1;
    }
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    /// Write `count` lines "line N" and an index with the given stride
    fn artifact(dir: &Path, count: u64, stride: u32) -> (std::path::PathBuf, LineIndex) {
        let path = dir.join("out.log");
        let mut data = Vec::new();
        let mut index = LineIndex::new(stride, DetectedEncoding::utf8());
        for n in 1..=count {
            index.observe_line(n, data.len() as u64);
            data.extend_from_slice(format!("line {}\n", n).as_bytes());
        }
        fs::write(&path, data).unwrap();
        (path, index)
    }

    #[test]
    fn test_window_seeks_to_checkpoint() {
        let dir = tempdir().unwrap();
        let (path, index) = artifact(dir.path(), 1000, 500);

        let window = read_lines(&path, Some(&index), DetectedEncoding::utf8(), 501, 510).unwrap();
        assert_eq!(window.scanned_from_line, 501);
        assert_eq!(window.lines.len(), 10);
        assert_eq!(window.lines[0], "line 501");
        assert_eq!(window.lines[9], "line 510");
        assert_eq!(window.last_line(), Some(510));
    }

    #[test]
    fn test_window_matches_linear_scan() {
        let dir = tempdir().unwrap();
        let (path, index) = artifact(dir.path(), 97, 8);
        let all: Vec<String> = fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();

        for start in 1..=99u64 {
            for end in [start, start + 1, start + 7, start + 8, start + 30] {
                let window =
                    read_lines(&path, Some(&index), DetectedEncoding::utf8(), start, end).unwrap();
                let lo = (start - 1) as usize;
                let hi = (end as usize).min(all.len());
                let expected: &[String] = if lo < hi { &all[lo..hi] } else { &[] };
                assert_eq!(window.lines, expected, "range {}..={}", start, end);
            }
        }
    }

    #[test]
    fn test_range_edges() {
        let dir = tempdir().unwrap();
        let (path, index) = artifact(dir.path(), 5, 2);
        let enc = DetectedEncoding::utf8();

        let clamped = read_lines(&path, Some(&index), enc, 0, 2).unwrap();
        assert_eq!(clamped.first_line, 1);
        assert_eq!(clamped.lines, vec!["line 1", "line 2"]);

        assert!(read_lines(&path, Some(&index), enc, 4, 3).unwrap().lines.is_empty());

        let tail = read_lines(&path, Some(&index), enc, 4, 100).unwrap();
        assert_eq!(tail.lines, vec!["line 4", "line 5"]);

        assert!(read_lines(&path, Some(&index), enc, 50, 60).unwrap().lines.is_empty());
    }

    #[test]
    fn test_crlf_and_missing_final_newline() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.log");
        fs::write(&path, b"one\r\ntwo\r\nthree").unwrap();

        let window = read_lines(&path, None, DetectedEncoding::utf8(), 1, 3).unwrap();
        assert_eq!(window.lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.log");
        fs::write(&path, b"ok\nbad \xFF\xFE here\n").unwrap();

        let window = read_lines(&path, None, DetectedEncoding::utf8(), 2, 2).unwrap();
        assert!(window.lines[0].contains('\u{FFFD}'));
        assert!(window.lines[0].starts_with("bad "));
    }

    #[test]
    fn test_read_window_falls_back_without_index() {
        let dir = tempdir().unwrap();
        let (path, _) = artifact(dir.path(), 20, 5);
        let missing = dir.path().join("missing.idx");

        let window = read_window(&path, &missing, DetectedEncoding::utf8(), 12, 13).unwrap();
        assert_eq!(window.scanned_from_line, 1);
        assert_eq!(window.lines, vec!["line 12", "line 13"]);
    }

    #[test]
    fn test_read_window_uses_index_file() {
        let dir = tempdir().unwrap();
        let (path, index) = artifact(dir.path(), 20, 5);
        let index_path = dir.path().join("out.idx");
        index.write_to(&index_path).unwrap();

        let window = read_window(&path, &index_path, DetectedEncoding::utf8(), 12, 13).unwrap();
        assert_eq!(window.scanned_from_line, 11);
        assert_eq!(window.lines, vec!["line 12", "line 13"]);
    }

    #[test]
    fn test_centered_range() {
        assert_eq!(centered_range(1000, 500, 5000), (750, 1249));
        assert_eq!(centered_range(10, 500, 5000), (1, 500));
        assert_eq!(centered_range(4990, 500, 5000), (4501, 5000));
        assert_eq!(centered_range(3, 500, 7), (1, 7));
        assert_eq!(centered_range(99, 10, 50), (41, 50));
        assert_eq!(centered_range(5, 0, 50), (5, 5));
        assert_eq!(centered_range(5, 10, 0), (1, 0));
    }
}
