//! Keyword pattern compilation.
//!
//! Keyword lists become a single case-insensitive alternation of escaped
//! literals. Matching runs on raw line bytes whenever every keyword can be
//! expressed in the file's encoding, so a multi-gigabyte scan never
//! allocates a decoded string per line. Keywords that cannot be encoded fall
//! back to matching against the lossily decoded line.

use crate::error::Result;
use crate::utils::DetectedEncoding;
use memchr::memmem;
use regex::bytes::{Regex as BytesRegex, RegexBuilder as BytesRegexBuilder};
use regex::{Regex, RegexBuilder};
use std::fmt::Write as _;

/// Trim keywords, drop blanks and duplicates, keep first-seen order
pub fn normalize_keywords<I, S>(keywords: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = Vec::new();
    for keyword in keywords {
        let trimmed = keyword.as_ref().trim();
        if trimmed.is_empty() || normalized.iter().any(|k| k == trimmed) {
            continue;
        }
        normalized.push(trimmed.to_string());
    }
    normalized
}

/// A compiled matcher for one keyword list
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Exact single literal on raw bytes (case-sensitive search)
    Literal(memmem::Finder<'static>),
    /// Alternation over raw bytes
    Bytes(BytesRegex),
    /// Alternation over the decoded line
    Text {
        regex: Regex,
        encoding: DetectedEncoding,
    },
}

impl Matcher {
    /// Compile keywords for `encoding`. Returns None for an empty list.
    pub fn compile(
        keywords: &[String],
        encoding: DetectedEncoding,
        case_sensitive: bool,
    ) -> Result<Option<Self>> {
        if keywords.is_empty() {
            return Ok(None);
        }

        if case_sensitive
            && keywords.len() == 1
            && let Some(needle) = encode_keyword(&keywords[0], encoding)
        {
            return Ok(Some(Matcher::Literal(memmem::Finder::new(&needle).into_owned())));
        }

        if let Some(pattern) = byte_pattern(keywords, encoding)
            && let Ok(regex) = BytesRegexBuilder::new(&pattern)
                .case_insensitive(!case_sensitive)
                .build()
        {
            return Ok(Some(Matcher::Bytes(regex)));
        }

        let regex = RegexBuilder::new(&text_pattern(keywords))
            .case_insensitive(!case_sensitive)
            .build()?;
        Ok(Some(Matcher::Text { regex, encoding }))
    }

    /// Whether any keyword occurs anywhere in `line`
    #[inline]
    pub fn is_match(&self, line: &[u8]) -> bool {
        match self {
            Matcher::Literal(finder) => finder.find(line).is_some(),
            Matcher::Bytes(regex) => regex.is_match(line),
            Matcher::Text { regex, encoding } => regex.is_match(&encoding.decode_lossy(line)),
        }
    }

    /// True when matching avoids decoding
    pub fn is_byte_level(&self) -> bool {
        !matches!(self, Matcher::Text { .. })
    }
}

/// Keep and exclude matchers applied together
#[derive(Debug, Clone)]
pub struct PatternSet {
    keep: Option<Matcher>,
    exclude: Option<Matcher>,
    keep_keywords: Vec<String>,
    exclude_keywords: Vec<String>,
}

impl PatternSet {
    /// Compile keep/exclude lists. Empty lists mean "keep everything" and
    /// "exclude nothing".
    pub fn compile(keep: &[String], exclude: &[String], encoding: DetectedEncoding) -> Result<Self> {
        let keep_keywords = normalize_keywords(keep);
        let exclude_keywords = normalize_keywords(exclude);

        Ok(Self {
            keep: Matcher::compile(&keep_keywords, encoding, false)?,
            exclude: Matcher::compile(&exclude_keywords, encoding, false)?,
            keep_keywords,
            exclude_keywords,
        })
    }

    /// Whether a line (without terminator) survives the filter
    #[inline]
    pub fn accepts(&self, line: &[u8]) -> bool {
        let kept = self.keep.as_ref().is_none_or(|m| m.is_match(line));
        kept && !self.exclude.as_ref().is_some_and(|m| m.is_match(line))
    }

    /// True when every line survives
    pub fn is_passthrough(&self) -> bool {
        self.keep.is_none() && self.exclude.is_none()
    }

    /// True when no matcher needs to decode lines
    pub fn is_byte_level(&self) -> bool {
        self.keep.as_ref().is_none_or(Matcher::is_byte_level)
            && self.exclude.as_ref().is_none_or(Matcher::is_byte_level)
    }

    pub fn keep_keywords(&self) -> &[String] {
        &self.keep_keywords
    }

    pub fn exclude_keywords(&self) -> &[String] {
        &self.exclude_keywords
    }
}

fn encode_keyword(keyword: &str, encoding: DetectedEncoding) -> Option<Vec<u8>> {
    if encoding.is_utf8() {
        Some(keyword.as_bytes().to_vec())
    } else {
        encoding.encode_strict(keyword)
    }
}

/// Byte-level alternation, or None if some keyword has no representation
/// in the encoding
fn byte_pattern(keywords: &[String], encoding: DetectedEncoding) -> Option<String> {
    if encoding.is_utf8() {
        // Unicode mode on a bytes regex matches UTF-8 sequences directly and
        // keeps full Unicode case folding.
        return Some(text_pattern(keywords));
    }

    let mut alternatives = Vec::with_capacity(keywords.len());
    let mut char_buf = [0u8; 4];
    for keyword in keywords {
        let whole = encoding.encode_strict(keyword)?;
        let mut joined = Vec::with_capacity(whole.len());
        let mut escaped = String::with_capacity(whole.len() * 4);
        for ch in keyword.chars() {
            let bytes = encoding.encode_strict(ch.encode_utf8(&mut char_buf))?;
            push_escaped_char(&mut escaped, &bytes);
            joined.extend_from_slice(&bytes);
        }
        // Stateful encodings (escape sequences) do not encode char by char
        if joined != whole {
            return None;
        }
        alternatives.push(escaped);
    }

    // Unicode off: \xHH is a raw byte and case folding is ASCII-only
    Some(format!("(?-u:{})", alternatives.join("|")))
}

/// Escape one encoded character. Only a lone ASCII byte may case-fold: the
/// trail byte of a multi-byte character can fall in the ASCII letter range
/// and must match exactly.
fn push_escaped_char(escaped: &mut String, bytes: &[u8]) {
    match bytes {
        [byte] if byte.is_ascii_alphanumeric() => escaped.push(*byte as char),
        [byte] if byte.is_ascii() => {
            let _ = write!(escaped, "\\x{:02X}", byte);
        }
        _ => {
            escaped.push_str("(?-i:");
            for byte in bytes {
                let _ = write!(escaped, "\\x{:02X}", byte);
            }
            escaped.push(')');
        }
    }
}

fn text_pattern(keywords: &[String]) -> String {
    keywords
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|")
}
