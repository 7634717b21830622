//! Text encoding detection for log files.
//!
//! Detection samples a fixed-size prefix and tries an ordered list of
//! candidates. The result is a best guess without a confidence score: one
//! encoding is chosen for the whole file and every later decode replaces
//! bytes that do not fit it. Nothing here ever fails on content.

use encoding_rs::{Encoding, GBK, UTF_8, WINDOWS_1252};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Bytes read from the head of a file for detection
pub const ENCODING_SAMPLE_BYTES: usize = 64 * 1024;

/// Candidates in preference order. The fallback is tried last and cannot fail.
/// GBK decodes with the full gb18030 decoder, so GB18030 text is covered and
/// any double-byte sample it rejects (Big5 included) is rejected by the
/// other Chinese decoders too.
const CANDIDATES: [&Encoding; 2] = [UTF_8, GBK];

/// Byte-preserving encoding used when no candidate decodes the sample
const FALLBACK: &Encoding = WINDOWS_1252;

/// The encoding picked for a file. Lossy by nature: lines that do not fit it
/// are decoded with U+FFFD replacement characters.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DetectedEncoding(&'static Encoding);

impl DetectedEncoding {
    pub fn utf8() -> Self {
        Self(UTF_8)
    }

    /// The byte-preserving fallback
    pub fn fallback() -> Self {
        Self(FALLBACK)
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Encoding::for_label(label.trim().as_bytes()).map(Self)
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.0
    }

    pub fn is_utf8(&self) -> bool {
        self.0 == UTF_8
    }

    pub fn is_fallback(&self) -> bool {
        self.0 == FALLBACK
    }

    /// Decode bytes, replacing malformed sequences
    pub fn decode_lossy<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        self.0.decode_without_bom_handling(bytes).0
    }

    /// Encode text into this encoding, or None if any character is unmappable
    pub fn encode_strict(&self, text: &str) -> Option<Vec<u8>> {
        let (bytes, _, had_errors) = self.0.encode(text);
        if had_errors {
            None
        } else {
            Some(bytes.into_owned())
        }
    }
}

impl Default for DetectedEncoding {
    fn default() -> Self {
        Self::utf8()
    }
}

impl fmt::Debug for DetectedEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DetectedEncoding").field(&self.name()).finish()
    }
}

impl fmt::Display for DetectedEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for DetectedEncoding {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for DetectedEncoding {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Self::from_label(&label)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown encoding: {}", label)))
    }
}

/// Detect the encoding of a file from its first [`ENCODING_SAMPLE_BYTES`]
pub fn detect_encoding(path: &Path) -> io::Result<DetectedEncoding> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();

    let mut sample = Vec::with_capacity(ENCODING_SAMPLE_BYTES.min(len as usize));
    file.take(ENCODING_SAMPLE_BYTES as u64).read_to_end(&mut sample)?;

    let truncated = (sample.len() as u64) < len;
    Ok(detect_from_sample(&sample, truncated))
}

/// Pick an encoding for a sample. `truncated` means the sample is a prefix of
/// a longer file, so a multi-byte character may be cut at the end.
pub fn detect_from_sample(sample: &[u8], truncated: bool) -> DetectedEncoding {
    if let Some((encoding, _)) = Encoding::for_bom(sample)
        && encoding == UTF_8
    {
        return DetectedEncoding::utf8();
    }

    // Cut back to a line boundary so the tail of a split character is not
    // counted against the legacy candidates.
    let sample = if truncated {
        match memchr::memrchr(b'\n', sample) {
            Some(pos) => &sample[..=pos],
            None => sample,
        }
    } else {
        sample
    };

    for candidate in CANDIDATES {
        if candidate == UTF_8 {
            match std::str::from_utf8(sample) {
                Ok(_) => return DetectedEncoding::utf8(),
                // Incomplete sequence at the very end of a prefix
                Err(e) if truncated && e.error_len().is_none() => {
                    return DetectedEncoding::utf8();
                }
                Err(_) => continue,
            }
        }

        if candidate
            .decode_without_bom_handling_and_without_replacement(sample)
            .is_some()
        {
            return DetectedEncoding(candidate);
        }
    }

    DetectedEncoding::fallback()
}
