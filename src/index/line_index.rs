//! Sparse line-offset index over an output artifact.
//!
//! One checkpoint is kept every `stride` lines: the 1-based line number and
//! the byte offset of that line's first byte. Reaching line L costs a seek to
//! the greatest checkpoint at or below L plus at most `stride - 1` line scans.
//!
//! File layout (little-endian):
//!
//! ```text
//! magic "LSIX" | version u16 | stride u32 | name_len u8 | encoding name
//! total_lines u64 | count u32 | count x (varint line delta, varint offset delta)
//! ```

use crate::error::{FilterError, Result};
use crate::utils::{
    decode_varint, encode_varint, read_u16_le, read_u32_le, read_u64_le, write_u16_le,
    write_u32_le, write_u64_le, DetectedEncoding,
};
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

pub const INDEX_MAGIC: u32 = u32::from_le_bytes(*b"LSIX");
pub const INDEX_VERSION: u16 = 1;

/// Line number and byte offset of the start of that line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub line: u64,
    pub offset: u64,
}

impl Checkpoint {
    pub const START: Checkpoint = Checkpoint { line: 1, offset: 0 };
}

/// Append-only checkpoint list with a fixed stride
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIndex {
    stride: u32,
    encoding: DetectedEncoding,
    checkpoints: Vec<Checkpoint>,
    total_lines: u64,
}

impl LineIndex {
    pub fn new(stride: u32, encoding: DetectedEncoding) -> Self {
        Self {
            stride: stride.max(1),
            encoding,
            checkpoints: Vec::new(),
            total_lines: 0,
        }
    }

    /// Record that `line` starts at `offset`. Called once per written line,
    /// in order; checkpoints land on lines 1, 1 + stride, 1 + 2*stride, ...
    pub fn observe_line(&mut self, line: u64, offset: u64) {
        if line == 0 {
            return;
        }

        if (line - 1) % self.stride as u64 == 0 {
            let checkpoint = Checkpoint { line, offset };
            match self.checkpoints.last() {
                Some(last) if last.line >= line || last.offset >= offset => {
                    debug_assert!(false, "checkpoint out of order: {:?} after {:?}", checkpoint, last);
                }
                _ => self.checkpoints.push(checkpoint),
            }
        }

        self.total_lines = self.total_lines.max(line);
    }

    /// Greatest checkpoint whose line is `<= line`, or the file start
    pub fn checkpoint_for(&self, line: u64) -> Checkpoint {
        let idx = self.checkpoints.partition_point(|cp| cp.line <= line);
        if idx == 0 {
            Checkpoint::START
        } else {
            self.checkpoints[idx - 1]
        }
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn encoding(&self) -> DetectedEncoding {
        self.encoding
    }

    pub fn total_lines(&self) -> u64 {
        self.total_lines
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Serialize to the on-disk layout
    pub fn encode(&self) -> Vec<u8> {
        let name = self.encoding.name().as_bytes();
        let mut buf = Vec::with_capacity(32 + name.len() + self.checkpoints.len() * 6);

        // Writes into a Vec cannot fail
        let _ = write_u32_le(&mut buf, INDEX_MAGIC);
        let _ = write_u16_le(&mut buf, INDEX_VERSION);
        let _ = write_u32_le(&mut buf, self.stride);
        buf.push(name.len() as u8);
        buf.extend_from_slice(name);
        let _ = write_u64_le(&mut buf, self.total_lines);
        let _ = write_u32_le(&mut buf, self.checkpoints.len() as u32);

        let mut prev = Checkpoint { line: 0, offset: 0 };
        for cp in &self.checkpoints {
            encode_varint(cp.line - prev.line, &mut buf);
            encode_varint(cp.offset - prev.offset, &mut buf);
            prev = *cp;
        }

        buf
    }

    /// Parse and validate the on-disk layout
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let truncated = |_| FilterError::corrupt("truncated header");

        let magic = read_u32_le(&mut cursor).map_err(truncated)?;
        if magic != INDEX_MAGIC {
            return Err(FilterError::corrupt("bad magic"));
        }
        let version = read_u16_le(&mut cursor).map_err(truncated)?;
        if version != INDEX_VERSION {
            return Err(FilterError::corrupt(format!("unsupported version {}", version)));
        }
        let stride = read_u32_le(&mut cursor).map_err(truncated)?;
        if stride == 0 {
            return Err(FilterError::corrupt("zero stride"));
        }

        let mut name_len = [0u8; 1];
        cursor.read_exact(&mut name_len).map_err(truncated)?;
        let mut name = vec![0u8; name_len[0] as usize];
        cursor.read_exact(&mut name).map_err(truncated)?;
        let encoding = std::str::from_utf8(&name)
            .ok()
            .and_then(DetectedEncoding::from_label)
            .ok_or_else(|| FilterError::corrupt("unknown encoding"))?;

        let total_lines = read_u64_le(&mut cursor).map_err(truncated)?;
        let count = read_u32_le(&mut cursor).map_err(truncated)? as usize;

        let mut pos = cursor.position() as usize;
        // Each checkpoint needs at least two bytes
        if count > (data.len() - pos) / 2 {
            return Err(FilterError::corrupt("checkpoint count exceeds file size"));
        }

        let mut checkpoints = Vec::with_capacity(count);
        let mut prev = Checkpoint { line: 0, offset: 0 };
        for i in 0..count {
            let (line_delta, used) = decode_varint(&data[pos..])
                .ok_or_else(|| FilterError::corrupt("truncated checkpoint"))?;
            pos += used;
            let (offset_delta, used) = decode_varint(&data[pos..])
                .ok_or_else(|| FilterError::corrupt("truncated checkpoint"))?;
            pos += used;

            // Strictly increasing in both fields; only the first may sit at offset 0
            if line_delta == 0 || (i > 0 && offset_delta == 0) {
                return Err(FilterError::corrupt("checkpoints not strictly increasing"));
            }
            let line = prev
                .line
                .checked_add(line_delta)
                .ok_or_else(|| FilterError::corrupt("line overflow"))?;
            let offset = prev
                .offset
                .checked_add(offset_delta)
                .ok_or_else(|| FilterError::corrupt("offset overflow"))?;
            if line > total_lines {
                return Err(FilterError::corrupt("checkpoint past last line"));
            }

            prev = Checkpoint { line, offset };
            checkpoints.push(prev);
        }

        if pos != data.len() {
            return Err(FilterError::corrupt("trailing bytes"));
        }

        Ok(Self {
            stride,
            encoding,
            checkpoints,
            total_lines,
        })
    }

    /// Write the index next to its artifact. Goes through a temp file and a
    /// rename so readers never see a half-written index.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("idx.tmp");
        fs::write(&tmp_path, self.encode())?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Load an index file. Missing and malformed files both report
    /// [`FilterError::IndexCorrupt`].
    pub fn read_from(path: &Path) -> Result<Self> {
        let data = fs::read(path)
            .map_err(|e| FilterError::corrupt(format!("{}: {}", path.display(), e)))?;
        Self::decode(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn index_with_lines(stride: u32, line_len: u64, lines: u64) -> LineIndex {
        let mut index = LineIndex::new(stride, DetectedEncoding::utf8());
        for line in 1..=lines {
            index.observe_line(line, (line - 1) * line_len);
        }
        index
    }

    #[test]
    fn test_checkpoints_land_on_stride_boundaries() {
        let index = index_with_lines(500, 10, 1000);
        let lines: Vec<u64> = index.checkpoints().iter().map(|cp| cp.line).collect();
        assert_eq!(lines, vec![1, 501]);
        assert_eq!(index.checkpoints()[1].offset, 5000);
        assert_eq!(index.total_lines(), 1000);
    }

    #[test]
    fn test_checkpoint_lookup_is_lower_bound() {
        let index = index_with_lines(500, 10, 1200);
        assert_eq!(index.checkpoint_for(1).line, 1);
        assert_eq!(index.checkpoint_for(500).line, 1);
        assert_eq!(index.checkpoint_for(501).line, 501);
        assert_eq!(index.checkpoint_for(999).line, 501);
        assert_eq!(index.checkpoint_for(1001).line, 1001);
        assert_eq!(index.checkpoint_for(u64::MAX).line, 1001);
    }

    #[test]
    fn test_empty_index_lookup_starts_at_zero() {
        let index = LineIndex::new(500, DetectedEncoding::utf8());
        assert_eq!(index.checkpoint_for(42), Checkpoint::START);
        assert_eq!(index.total_lines(), 0);
    }

    #[test]
    fn test_zero_stride_is_clamped() {
        let index = index_with_lines(0, 3, 3);
        assert_eq!(index.stride(), 1);
        assert_eq!(index.checkpoints().len(), 3);
    }

    #[test]
    fn test_file_roundtrip_keeps_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.idx");

        let mut index = LineIndex::new(4, DetectedEncoding::from_label("gbk").unwrap());
        let mut offset = 0;
        for line in 1..=10u64 {
            index.observe_line(line, offset);
            offset += line * 3;
        }
        index.write_to(&path).unwrap();

        let loaded = LineIndex::read_from(&path).unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded.encoding().name(), "GBK");
        assert_eq!(loaded.stride(), 4);
        assert!(!dir.path().join("s.idx.tmp").exists());
    }

    #[test]
    fn test_missing_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let err = LineIndex::read_from(&dir.path().join("none.idx")).unwrap_err();
        assert!(matches!(err, FilterError::IndexCorrupt(_)));
    }

    #[test]
    fn test_decode_rejects_damage() {
        let bytes = index_with_lines(2, 7, 9).encode();

        assert!(LineIndex::decode(&bytes[..bytes.len() - 1]).is_err());
        assert!(LineIndex::decode(&bytes[..5]).is_err());

        let mut bad_magic = bytes.clone();
        bad_magic[0] ^= 0xFF;
        assert!(LineIndex::decode(&bad_magic).is_err());

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(LineIndex::decode(&trailing).is_err());
    }

    #[test]
    fn test_decode_rejects_non_increasing_checkpoints() {
        let mut index = LineIndex::new(1, DetectedEncoding::utf8());
        index.checkpoints = vec![
            Checkpoint { line: 1, offset: 0 },
            Checkpoint { line: 2, offset: 0 },
        ];
        index.total_lines = 2;
        assert!(LineIndex::decode(&index.encode()).is_err());
    }
}
