//! Allocation-free structural JSON scanning.
//!
//! The scanner validates JSON syntax without building values. Its only job
//! is to tell a payload that was cut short (input ran out mid-value) apart
//! from one that is actually broken.

/// Why a scan stopped before finding a complete value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanError {
    /// Input ended while a value was still open.
    Incomplete,
    /// A byte that cannot appear at this position.
    Invalid,
}

/// Structural classification of a complete `data:` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonShape {
    /// One complete value, optionally surrounded by whitespace.
    Complete,
    /// A valid prefix of a value; more bytes could complete it.
    Truncated,
    /// Not a prefix of any valid value, or trailing garbage after one.
    Malformed,
}

type ScanResult = Result<usize, ScanError>;

/// Deepest object/array nesting the scanner follows; deeper input is invalid.
pub(crate) const MAX_NESTING_DEPTH: usize = 128;

#[inline]
pub(crate) fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    let len = bytes.len();
    while i < len {
        match bytes[i] {
            b' ' | b'\n' | b'\r' | b'\t' => i += 1,
            _ => break,
        }
    }
    i
}

#[inline]
fn expect_more(bytes: &[u8], i: usize) -> Result<u8, ScanError> {
    bytes.get(i).copied().ok_or(ScanError::Incomplete)
}

#[inline]
pub(crate) fn parse_json_string_end(bytes: &[u8], start: usize) -> ScanResult {
    if expect_more(bytes, start)? != b'"' {
        return Err(ScanError::Invalid);
    }
    let len = bytes.len();
    let mut i = start + 1;
    while i < len {
        match bytes[i] {
            b'"' => return Ok(i + 1),
            b'\\' => {
                i += 1;
                match expect_more(bytes, i)? {
                    b'"' | b'\\' | b'/' | b'b' | b'f' | b'n' | b'r' | b't' => i += 1,
                    b'u' => {
                        i += 1;
                        for _ in 0..4 {
                            if !expect_more(bytes, i)?.is_ascii_hexdigit() {
                                return Err(ScanError::Invalid);
                            }
                            i += 1;
                        }
                    }
                    _ => return Err(ScanError::Invalid),
                }
            }
            0x00..=0x1F => return Err(ScanError::Invalid),
            _ => i += 1,
        }
    }
    Err(ScanError::Incomplete)
}

#[inline]
pub(crate) fn parse_json_value_end(bytes: &[u8], start: usize) -> ScanResult {
    parse_nested_value_end(bytes, start, 0)
}

fn parse_nested_value_end(bytes: &[u8], start: usize, depth: usize) -> ScanResult {
    let i = skip_ws(bytes, start);
    match expect_more(bytes, i)? {
        b'"' => parse_json_string_end(bytes, i),
        b'{' | b'[' if depth >= MAX_NESTING_DEPTH => Err(ScanError::Invalid),
        b'{' => parse_json_object_end(bytes, i, depth + 1),
        b'[' => parse_json_array_end(bytes, i, depth + 1),
        b't' => consume_literal(bytes, i, b"true"),
        b'f' => consume_literal(bytes, i, b"false"),
        b'n' => consume_literal(bytes, i, b"null"),
        b'-' | b'0'..=b'9' => parse_json_number_end(bytes, i),
        _ => Err(ScanError::Invalid),
    }
}

fn parse_json_object_end(bytes: &[u8], start: usize, depth: usize) -> ScanResult {
    let mut i = start + 1;
    i = skip_ws(bytes, i);
    if expect_more(bytes, i)? == b'}' {
        return Ok(i + 1);
    }
    loop {
        i = skip_ws(bytes, i);
        i = parse_json_string_end(bytes, i)?;
        i = skip_ws(bytes, i);
        if expect_more(bytes, i)? != b':' {
            return Err(ScanError::Invalid);
        }
        i = parse_nested_value_end(bytes, i + 1, depth)?;
        i = skip_ws(bytes, i);
        match expect_more(bytes, i)? {
            b',' => i += 1,
            b'}' => return Ok(i + 1),
            _ => return Err(ScanError::Invalid),
        }
    }
}

fn parse_json_array_end(bytes: &[u8], start: usize, depth: usize) -> ScanResult {
    let mut i = start + 1;
    i = skip_ws(bytes, i);
    if expect_more(bytes, i)? == b']' {
        return Ok(i + 1);
    }
    loop {
        i = parse_nested_value_end(bytes, i, depth)?;
        i = skip_ws(bytes, i);
        match expect_more(bytes, i)? {
            b',' => i += 1,
            b']' => return Ok(i + 1),
            _ => return Err(ScanError::Invalid),
        }
    }
}

#[inline]
fn consume_literal(bytes: &[u8], start: usize, lit: &[u8]) -> ScanResult {
    let available = &bytes[start..];
    if available.len() >= lit.len() {
        if &available[..lit.len()] == lit {
            Ok(start + lit.len())
        } else {
            Err(ScanError::Invalid)
        }
    } else if lit.starts_with(available) {
        Err(ScanError::Incomplete)
    } else {
        Err(ScanError::Invalid)
    }
}

#[inline]
fn scan_digits(bytes: &[u8], mut i: usize) -> ScanResult {
    if !expect_more(bytes, i)?.is_ascii_digit() {
        return Err(ScanError::Invalid);
    }
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    Ok(i)
}

#[inline]
fn parse_json_number_end(bytes: &[u8], start: usize) -> ScanResult {
    let len = bytes.len();
    let mut i = start;
    if bytes[i] == b'-' {
        i += 1;
    }

    match expect_more(bytes, i)? {
        b'0' => i += 1,
        b'1'..=b'9' => i = scan_digits(bytes, i)?,
        _ => return Err(ScanError::Invalid),
    }

    if i < len && bytes[i] == b'.' {
        i = scan_digits(bytes, i + 1)?;
    }

    if i < len && matches!(bytes[i], b'e' | b'E') {
        i += 1;
        if i < len && matches!(bytes[i], b'+' | b'-') {
            i += 1;
        }
        i = scan_digits(bytes, i)?;
    }

    // A number at the very end of the input may still be growing.
    if i == len {
        return Err(ScanError::Incomplete);
    }
    Ok(i)
}

/// Classify a `data:` payload as complete, truncated, or malformed.
///
/// Only object and array payloads are considered; a bare scalar at the top
/// level is never a valid stream payload.
#[must_use]
pub fn classify_json_payload(payload: &str) -> JsonShape {
    let bytes = payload.as_bytes();
    let start = skip_ws(bytes, 0);
    match bytes.get(start) {
        None => return JsonShape::Truncated,
        Some(b'{' | b'[') => {}
        Some(_) => return JsonShape::Malformed,
    }
    match parse_json_value_end(bytes, start) {
        Ok(end) if skip_ws(bytes, end) == bytes.len() => JsonShape::Complete,
        Ok(_) | Err(ScanError::Invalid) => JsonShape::Malformed,
        Err(ScanError::Incomplete) => JsonShape::Truncated,
    }
}

/// Byte length of the first complete object/array at the start of `payload`,
/// if one is present and is followed by more input.
#[must_use]
pub(crate) fn leading_value_len(payload: &str) -> Option<usize> {
    let bytes = payload.as_bytes();
    let start = skip_ws(bytes, 0);
    if !matches!(bytes.get(start), Some(b'{' | b'[')) {
        return None;
    }
    parse_json_value_end(bytes, start).ok()
}
