//! Request parser.
//!
//! Turns a frame into a method, a storage path, a header map and a body.
//! Header parsing is best-effort: lines without a colon are skipped.

use bytes::Bytes;
use std::collections::HashMap;
use std::str;

use crate::frame::Frame;

/// Request method, matched case-sensitively
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    /// Any other token, kept for logging
    Unsupported(String),
}

impl Method {
    fn from_token(token: &str) -> Self {
        match token {
            "GET" => Method::Get,
            "POST" => Method::Post,
            other => Method::Unsupported(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Unsupported(token) => token,
        }
    }
}

/// Request parsing errors
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Request line does not have exactly three tokens
    MalformedRequestLine(String),
    /// Header block is not valid UTF-8
    InvalidEncoding,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::MalformedRequestLine(line) => {
                write!(f, "Malformed request line: {:?}", line)
            }
            ParseError::InvalidEncoding => write!(f, "Header block is not valid UTF-8"),
        }
    }
}

impl std::error::Error for ParseError {}

/// A parsed request
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Request path with a single leading `/` removed
    pub path: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl Request {
    /// Parse a request from a complete frame.
    pub fn parse(frame: &Frame) -> Result<Self, ParseError> {
        let head = str::from_utf8(&frame.head).map_err(|_| ParseError::InvalidEncoding)?;
        let mut lines = head.split("\r\n");

        let request_line = lines.next().unwrap_or_default();
        let tokens: Vec<&str> = request_line.split_whitespace().collect();
        let [method, path, version] = tokens[..] else {
            return Err(ParseError::MalformedRequestLine(request_line.to_string()));
        };

        Ok(Request {
            method: Method::from_token(method),
            path: path.strip_prefix('/').unwrap_or(path).to_string(),
            version: version.to_string(),
            headers: parse_headers(lines),
            body: frame.body.clone(),
        })
    }

    /// Look up a header by its exact name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// True when the client asked for the connection to be closed.
    ///
    /// Looks up the parsed `Connection` header for the exact value `close`
    /// rather than substring-matching `Connection: close` in the raw head,
    /// so `Connection:close` closes and `Connection: close, x` does not.
    pub fn wants_close(&self) -> bool {
        self.header("Connection") == Some("close")
    }
}

/// Build a header map from `Key: Value` lines, skipping malformed ones.
pub fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> HashMap<String, String> {
    lines
        .filter_map(split_header_line)
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Split a header line on its first colon, trimming surrounding whitespace.
pub fn split_header_line(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim()))
}
