//! Keyword search over a finished output artifact.
//!
//! The artifact is memory-mapped and split on `\n` with `memchr`. Lines are
//! matched without their terminator using the same byte/text strategy as the
//! filter, so a keyword found by the filter is found here too.

use crate::error::{FilterError, Result};
use crate::filter::Matcher;
use crate::index::{Checkpoint, LineIndex};
use crate::utils::{trim_line_ending, DetectedEncoding};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// Artifact bytes, or nothing for an empty file (which cannot be mapped)
enum Artifact {
    Mapped(Mmap),
    Empty,
}

impl Artifact {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Artifact::Empty);
        }
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Artifact::Mapped(mmap))
    }

    fn bytes(&self) -> &[u8] {
        match self {
            Artifact::Mapped(mmap) => &mmap[..],
            Artifact::Empty => &[],
        }
    }
}

fn compile_keyword(
    keyword: &str,
    encoding: DetectedEncoding,
    case_sensitive: bool,
) -> Result<Matcher> {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        return Err(FilterError::invalid("search keyword is empty"));
    }
    Matcher::compile(&[keyword.to_string()], encoding, case_sensitive)?
        .ok_or_else(|| FilterError::invalid("search keyword is empty"))
}

/// Lines of `data` starting at a checkpoint, terminators stripped
struct Lines<'a> {
    data: &'a [u8],
    pos: usize,
    line: u64,
}

impl<'a> Lines<'a> {
    fn from_checkpoint(data: &'a [u8], checkpoint: Checkpoint) -> Self {
        Self {
            data,
            pos: (checkpoint.offset as usize).min(data.len()),
            line: checkpoint.line,
        }
    }
}

impl<'a> Iterator for Lines<'a> {
    type Item = (u64, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let rest = &self.data[self.pos..];
        let end = memchr::memchr(b'\n', rest).map_or(rest.len(), |i| i + 1);
        let line = (self.line, trim_line_ending(&rest[..end]));
        self.pos += end;
        self.line += 1;
        Some(line)
    }
}

/// First line `>= from_line` containing `keyword`.
///
/// With an index the scan starts at the greatest checkpoint `<= from_line`
/// instead of the top of the file.
pub fn search_next(
    artifact: &Path,
    index: Option<&LineIndex>,
    encoding: DetectedEncoding,
    from_line: u64,
    keyword: &str,
    case_sensitive: bool,
) -> Result<Option<u64>> {
    let matcher = compile_keyword(keyword, encoding, case_sensitive)?;
    let artifact = Artifact::open(artifact)?;
    let from_line = from_line.max(1);
    let checkpoint = index.map_or(Checkpoint::START, |idx| idx.checkpoint_for(from_line));

    Ok(Lines::from_checkpoint(artifact.bytes(), checkpoint)
        .skip_while(|(line, _)| *line < from_line)
        .find(|(_, text)| matcher.is_match(text))
        .map(|(line, _)| line))
}

/// Last line `< before_line` containing `keyword`.
///
/// Without an index this scans from the top keeping the last match. With
/// one, checkpoint blocks are scanned from the nearest block backwards and
/// the first block holding a match decides.
pub fn search_prev(
    artifact: &Path,
    index: Option<&LineIndex>,
    encoding: DetectedEncoding,
    before_line: u64,
    keyword: &str,
    case_sensitive: bool,
) -> Result<Option<u64>> {
    let matcher = compile_keyword(keyword, encoding, case_sensitive)?;
    if before_line <= 1 {
        return Ok(None);
    }
    let artifact = Artifact::open(artifact)?;
    let data = artifact.bytes();

    let last_match_in = |from: Checkpoint, upper: u64| {
        Lines::from_checkpoint(data, from)
            .take_while(|(line, _)| *line < upper)
            .filter(|(_, text)| matcher.is_match(text))
            .last()
            .map(|(line, _)| line)
    };

    let mut upper = before_line;
    if let Some(index) = index {
        let checkpoints = index.checkpoints();
        let below = checkpoints.partition_point(|cp| cp.line < before_line);
        for cp in checkpoints[..below].iter().rev() {
            if let Some(found) = last_match_in(*cp, upper) {
                return Ok(Some(found));
            }
            upper = cp.line;
        }
    }

    if upper <= 1 {
        return Ok(None);
    }
    Ok(last_match_in(Checkpoint::START, upper))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};

    /// Artifact where every 7th line mentions "needle"
    fn artifact(count: u64, stride: u32) -> (TempDir, PathBuf, LineIndex) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.log");
        let mut data = Vec::new();
        let mut index = LineIndex::new(stride, DetectedEncoding::utf8());
        for n in 1..=count {
            index.observe_line(n, data.len() as u64);
            if n % 7 == 0 {
                data.extend_from_slice(format!("{} found Needle here\n", n).as_bytes());
            } else {
                data.extend_from_slice(format!("{} nothing\n", n).as_bytes());
            }
        }
        fs::write(&path, data).unwrap();
        (dir, path, index)
    }

    #[test]
    fn test_next_and_prev() {
        let (_dir, path, index) = artifact(100, 10);
        let utf8 = DetectedEncoding::utf8();

        assert_eq!(search_next(&path, Some(&index), utf8, 1, "needle", false).unwrap(), Some(7));
        assert_eq!(search_next(&path, Some(&index), utf8, 7, "needle", false).unwrap(), Some(7));
        assert_eq!(search_next(&path, Some(&index), utf8, 8, "needle", false).unwrap(), Some(14));
        assert_eq!(search_next(&path, Some(&index), utf8, 99, "needle", false).unwrap(), None);

        assert_eq!(search_prev(&path, Some(&index), utf8, 14, "needle", false).unwrap(), Some(7));
        assert_eq!(search_prev(&path, Some(&index), utf8, 15, "needle", false).unwrap(), Some(14));
        assert_eq!(search_prev(&path, Some(&index), utf8, 7, "needle", false).unwrap(), None);
        assert_eq!(search_prev(&path, Some(&index), utf8, 1, "needle", false).unwrap(), None);
        assert_eq!(search_prev(&path, Some(&index), utf8, 500, "needle", false).unwrap(), Some(98));
    }

    #[test]
    fn test_index_does_not_change_results() {
        let (_dir, path, index) = artifact(120, 9);
        let utf8 = DetectedEncoding::utf8();

        for line in 0..=125 {
            assert_eq!(
                search_next(&path, Some(&index), utf8, line, "needle", false).unwrap(),
                search_next(&path, None, utf8, line, "needle", false).unwrap(),
            );
            assert_eq!(
                search_prev(&path, Some(&index), utf8, line, "needle", false).unwrap(),
                search_prev(&path, None, utf8, line, "needle", false).unwrap(),
            );
        }
    }

    #[test]
    fn test_next_prev_symmetry() {
        let (_dir, path, index) = artifact(80, 4);
        let utf8 = DetectedEncoding::utf8();

        for line in 1..=80 {
            if let Some(m) = search_next(&path, Some(&index), utf8, line, "needle", false).unwrap() {
                assert_eq!(
                    search_prev(&path, Some(&index), utf8, m + 1, "needle", false).unwrap(),
                    Some(m)
                );
            }
        }
    }

    #[test]
    fn test_case_sensitivity() {
        let (_dir, path, _) = artifact(20, 10);
        let utf8 = DetectedEncoding::utf8();

        assert_eq!(search_next(&path, None, utf8, 1, "needle", true).unwrap(), None);
        assert_eq!(search_next(&path, None, utf8, 1, "Needle", true).unwrap(), Some(7));
    }

    #[test]
    fn test_blank_keyword_rejected() {
        let (_dir, path, _) = artifact(5, 10);
        let err = search_next(&path, None, DetectedEncoding::utf8(), 1, "  ", false).unwrap_err();
        assert!(matches!(err, FilterError::InvalidRequest(_)));
        assert!(search_prev(&path, None, DetectedEncoding::utf8(), 3, "", false).is_err());
    }

    #[test]
    fn test_empty_artifact_and_crlf() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty.log");
        fs::write(&empty, b"").unwrap();
        let utf8 = DetectedEncoding::utf8();
        assert_eq!(search_next(&empty, None, utf8, 1, "x", false).unwrap(), None);
        assert_eq!(search_prev(&empty, None, utf8, 10, "x", false).unwrap(), None);

        let crlf = dir.path().join("crlf.log");
        fs::write(&crlf, b"a\r\nend\r\nb").unwrap();
        assert_eq!(search_next(&crlf, None, utf8, 1, "b", false).unwrap(), Some(3));
        assert_eq!(search_prev(&crlf, None, utf8, 3, "end", false).unwrap(), Some(2));
    }

    #[test]
    fn test_gbk_keyword() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gbk.log");
        let (bytes, _, _) = encoding_rs::GBK.encode("启动\n连接失败\n完成\n");
        fs::write(&path, &bytes).unwrap();

        let gbk = DetectedEncoding::from_label("gbk").unwrap();
        assert_eq!(search_next(&path, None, gbk, 1, "失败", false).unwrap(), Some(2));
    }
}
