//! Byte-range descriptor for chunk submissions.
//!
//! A submission declares the half-open range `[start, end)` it carries
//! and the total file size, rendered on the wire as
//! `bytes=<start>-<end>/<total>`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors produced while parsing a range descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    /// The textual form does not match `bytes=<start>-<end>/<total>`.
    #[error("malformed range descriptor: {0:?}")]
    Malformed(String),

    /// The numbers parsed but violate `0 <= start < end <= total`.
    #[error("invalid range bounds: start={start} end={end} total={total}")]
    InvalidBounds { start: u64, end: u64, total: u64 },
}

/// A contiguous byte range of a file, described by `(start, end, total)`.
///
/// Invariant (enforced by [`parse`](Self::parse) and [`new`](Self::new)):
/// `start < end <= total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl ContentRange {
    /// Builds a range, validating the bounds invariant.
    pub fn new(start: u64, end: u64, total: u64) -> Result<Self, RangeError> {
        if start >= total || start >= end || end > total {
            return Err(RangeError::InvalidBounds { start, end, total });
        }
        Ok(Self { start, end, total })
    }

    /// Parses `bytes=<start>-<end>/<total>`.
    ///
    /// Pure string work; performs no storage access.
    pub fn parse(header: &str) -> Result<Self, RangeError> {
        let malformed = || RangeError::Malformed(header.to_string());

        let rest = header.strip_prefix("bytes=").ok_or_else(malformed)?;
        let (range_part, total_part) = rest.split_once('/').ok_or_else(malformed)?;
        let (start_part, end_part) = range_part.split_once('-').ok_or_else(malformed)?;

        let start: u64 = parse_decimal(start_part).ok_or_else(malformed)?;
        let end: u64 = parse_decimal(end_part).ok_or_else(malformed)?;
        let total: u64 = parse_decimal(total_part).ok_or_else(malformed)?;

        Self::new(start, end, total)
    }

    /// Number of bytes the range covers.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// A valid range is never empty; kept for clippy symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// `true` if the range reaches the end of the file.
    pub fn is_suffix(&self) -> bool {
        self.end == self.total
    }
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes={}-{}/{}", self.start, self.end, self.total)
    }
}

/// Strict decimal parse: digits only, no sign, no surrounding whitespace.
fn parse_decimal(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
