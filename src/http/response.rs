//! HTTP response model

use crate::error::{GauntletError, Result};
use crate::http::encoding::{self, split_message};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// An HTTP response, either received from the transport or captured earlier
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Response {
    pub proto: String,
    pub code: u16,
    pub status: String,
    #[serde(default)]
    pub headers: HashMap<String, Vec<String>>,
    #[serde(default, with = "encoding::base64_bytes")]
    pub body: Vec<u8>,
    /// Total time spent on the exchange
    #[serde(default, with = "encoding::nanos")]
    pub time: Duration,
    /// Portion of `time` spent establishing the connection
    #[serde(default, with = "encoding::nanos")]
    pub conn_time: Duration,
}

impl Response {
    /// Parses a raw HTTP/1.x response dump (status line, headers, body)
    pub fn from_raw(raw: &[u8]) -> Result<Self> {
        let head = split_message(raw)
            .ok_or_else(|| GauntletError::InvalidRequest("malformed response head".to_string()))?;

        let mut parts = head.start_line.splitn(3, ' ');
        let proto = parts.next().unwrap_or_default().to_string();
        let code = parts
            .next()
            .and_then(|c| c.trim().parse::<u16>().ok())
            .ok_or_else(|| {
                GauntletError::InvalidRequest(format!("malformed status line: {}", head.start_line))
            })?;
        let status = parts.next().unwrap_or_default().trim().to_string();

        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in &head.headers {
            headers
                .entry((*name).to_string())
                .or_default()
                .push((*value).to_string());
        }

        Ok(Self {
            proto,
            code,
            status,
            headers,
            body: head.body.to_vec(),
            ..Self::default()
        })
    }

    /// True for the zero value (no response was obtained)
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// First value of a header, looked up case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.first())
            .map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// Length of the body in bytes
    pub fn content_length(&self) -> usize {
        self.body.len()
    }

    /// Time spent after the connection was established
    pub fn server_time(&self) -> Duration {
        self.time.saturating_sub(self.conn_time)
    }

    /// Status line and headers, terminated by the blank line
    pub fn head_bytes(&self) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", self.proto, self.code, self.status).into_bytes();

        let mut names: Vec<&String> = self.headers.keys().collect();
        names.sort_by_key(|n| n.to_ascii_lowercase());
        for name in names {
            for value in &self.headers[name] {
                out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
            }
        }
        out.extend_from_slice(b"\r\n");
        out
    }

    /// Renders the response in HTTP/1.x wire form
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.head_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw() {
        let raw = b"HTTP/1.1 404 Not Found\r\nContent-Type: text/html\r\nX-A: 1\r\nX-A: 2\r\n\r\n<h1>nope</h1>";
        let res = Response::from_raw(raw).expect("valid response");
        assert_eq!(res.code, 404);
        assert_eq!(res.status, "Not Found");
        assert_eq!(res.content_type(), Some("text/html"));
        assert_eq!(res.headers["X-A"].len(), 2);
        assert_eq!(res.content_length(), 13);
    }

    #[test]
    fn test_head_and_body_offsets() {
        let res = Response {
            proto: "HTTP/1.1".to_string(),
            code: 200,
            status: "OK".to_string(),
            body: b"body".to_vec(),
            ..Response::default()
        };
        let bytes = res.to_bytes();
        let head_len = res.head_bytes().len();
        assert_eq!(&bytes[head_len..], b"body");
    }

    #[test]
    fn test_server_time_never_underflows() {
        let res = Response {
            time: Duration::from_millis(10),
            conn_time: Duration::from_millis(50),
            ..Response::default()
        };
        assert_eq!(res.server_time(), Duration::ZERO);
        assert!(Response::default().is_empty());
        assert!(!res.is_empty());
    }

    #[test]
    fn test_json_roundtrip_keeps_every_field() {
        let mut res = Response::from_raw(
            b"HTTP/1.1 302 Found\r\nLocation: /next\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\n\x01\xfe",
        )
        .expect("valid response");
        res.time = Duration::from_micros(2500) + Duration::from_nanos(3);
        res.conn_time = Duration::from_nanos(999_999);

        let json = serde_json::to_string(&res).expect("serializes");
        let back: Response = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(back, res);
        assert!(!back.is_empty());
        assert_eq!(back.body, vec![0x01, 0xfe]);
    }
}
