use thiserror::Error;

/// Reasons a `Range` header value can be rejected. All of them surface to
/// the client as 416 Range Not Satisfiable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("unsupported range unit, expected bytes=")]
    UnsupportedUnits,
    #[error("malformed byte range")]
    Malformed,
    #[error("range start lies beyond the end of the file")]
    StartOutOfRange,
    #[error("range end precedes range start")]
    InvertedRange,
}

/// Parses a `Range: bytes=...` header value against a known content
/// length, returning the inclusive `(start, end)` pair to serve.
///
/// Accepted forms are `bytes=S-E`, `bytes=S-` and the suffix form
/// `bytes=-N` (last N bytes). Multi-range requests are not supported and
/// fail as malformed. `bytes=-0` names zero trailing bytes, which is
/// unsatisfiable like any other start at or past the end of the file.
pub fn parse_byte_range(value: &str, content_length: u64) -> Result<(u64, u64), RangeError> {
    let range_spec = value
        .strip_prefix("bytes=")
        .ok_or(RangeError::UnsupportedUnits)?;
    let (start_str, end_str) = range_spec.split_once('-').ok_or(RangeError::Malformed)?;

    if start_str.is_empty() {
        let suffix_len: u64 = end_str.parse().map_err(|_| RangeError::Malformed)?;
        let start = content_length.saturating_sub(suffix_len);
        if start >= content_length {
            return Err(RangeError::StartOutOfRange);
        }
        return Ok((start, content_length - 1));
    }

    let start: u64 = start_str.parse().map_err(|_| RangeError::Malformed)?;
    if start >= content_length {
        return Err(RangeError::StartOutOfRange);
    }

    if end_str.is_empty() {
        return Ok((start, content_length - 1));
    }

    let end: u64 = end_str.parse().map_err(|_| RangeError::Malformed)?;
    if end < start {
        return Err(RangeError::InvertedRange);
    }
    Ok((start, end.min(content_length - 1)))
}
