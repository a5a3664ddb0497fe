//! Serde helpers shared by the request/response model

/// Serializes byte buffers as standard base64 strings
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Serializes durations as whole nanoseconds, so they decode to the same
/// value. Durations past `u64::MAX` nanoseconds are rejected.
pub mod nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = u64::try_from(duration.as_nanos())
            .map_err(|_| serde::ser::Error::custom("duration out of range"))?;
        serializer.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_nanos(u64::deserialize(deserializer)?))
    }
}

/// Parsed head of an HTTP/1.x message: start line plus header lines
pub(crate) struct RawHead<'a> {
    pub start_line: &'a str,
    pub headers: Vec<(&'a str, &'a str)>,
    pub body: &'a [u8],
}

/// Splits a raw HTTP/1.x message into start line, headers and body.
/// Accepts both CRLF and bare LF line endings.
pub(crate) fn split_message(raw: &[u8]) -> Option<RawHead<'_>> {
    let (head_end, body_start) = find_head_end(raw)?;
    let head = std::str::from_utf8(&raw[..head_end]).ok()?;

    let mut lines = head.lines().map(|l| l.trim_end_matches('\r'));
    let start_line = lines.next()?;
    if start_line.trim().is_empty() {
        return None;
    }

    let headers = lines
        .filter(|l| !l.is_empty())
        .filter_map(|l| l.split_once(':'))
        .map(|(name, value)| (name.trim(), value.trim()))
        .collect();

    Some(RawHead {
        start_line,
        headers,
        body: &raw[body_start..],
    })
}

fn find_head_end(raw: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some((pos, pos + 4));
    }
    if let Some(pos) = raw.windows(2).position(|w| w == b"\n\n") {
        return Some((pos, pos + 2));
    }
    // Head-only message without the trailing blank line
    if !raw.is_empty() && std::str::from_utf8(raw).is_ok() {
        return Some((raw.len(), raw.len()));
    }
    None
}
