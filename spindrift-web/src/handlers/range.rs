//! HTTP Range header handling for content streaming.
//!
//! Implements the `bytes=start-end` subset of RFC 7233 that media players
//! actually send, with the lenient defaults streaming clients expect:
//! a missing or non-numeric start means 0, a missing end means the last
//! byte of the file.

use axum::http::{HeaderMap, StatusCode, header};

/// Inclusive byte span within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes the span covers.
    pub fn content_length(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Extracts the Range header value, if present and valid UTF-8.
pub fn extract_range_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::RANGE)
        .and_then(|range| range.to_str().ok())
        .map(|range| range.to_string())
}

/// Parses a `bytes=start-end` header against a known file size.
///
/// Garbled specs fall back to the full file rather than erroring; the
/// request still gets a partial-content response covering everything.
pub fn parse_range_header(range: &str, total_size: u64) -> ByteRange {
    let full = ByteRange {
        start: 0,
        end: total_size.saturating_sub(1),
    };

    let Some(spec) = range.strip_prefix("bytes=") else {
        return full;
    };
    let Some((start_str, end_str)) = spec.split_once('-') else {
        return full;
    };

    let start = start_str.parse::<u64>().unwrap_or(0);
    let end = if end_str.is_empty() {
        total_size.saturating_sub(1)
    } else {
        end_str
            .parse::<u64>()
            .unwrap_or_else(|_| total_size.saturating_sub(1))
    };

    ByteRange { start, end }
}

/// Checks a parsed range against the file size and clamps the end.
///
/// # Errors
/// Returns `RANGE_NOT_SATISFIABLE` when the start lies beyond the file or
/// past the end offset.
pub fn validate_range(range: ByteRange, total_size: u64) -> Result<ByteRange, StatusCode> {
    if total_size == 0 || range.start >= total_size || range.start > range.end {
        return Err(StatusCode::RANGE_NOT_SATISFIABLE);
    }

    Ok(ByteRange {
        start: range.start,
        end: range.end.min(total_size - 1),
    })
}
