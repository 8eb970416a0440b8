//! Response builder and content-type lookup.

use bytes::{BufMut, Bytes, BytesMut};
use std::path::Path;
use std::str;

use crate::frame::Frame;

/// Protocol version written on every status line
pub const PROTOCOL_VERSION: &str = "HTTP/1.1";

/// Fallback for unknown extensions
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const CONTENT_TYPES: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("txt", "text/plain"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
];

/// Map a path's extension to a MIME type (extensions match case-sensitively)
pub fn content_type_for(path: &str) -> &'static str {
    let Some(extension) = Path::new(path).extension().and_then(|e| e.to_str()) else {
        return DEFAULT_CONTENT_TYPE;
    };

    CONTENT_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, mime)| *mime)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

/// Status codes the server produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
    MethodNotAllowed,
}

impl Status {
    pub fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::MethodNotAllowed => 405,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::NotFound => "Not Found",
            Status::MethodNotAllowed => "Method Not Allowed",
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            200 => Some(Status::Ok),
            400 => Some(Status::BadRequest),
            404 => Some(Status::NotFound),
            405 => Some(Status::MethodNotAllowed),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

/// A response waiting to be serialized
#[derive(Debug, Clone)]
pub struct Response {
    pub status: Status,
    /// Headers in emission order; `Content-Length` is added by `to_bytes`
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: Status) -> Self {
        Response {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// A plain-text response advertising `Connection: close`
    pub fn error(status: Status, message: &str) -> Self {
        Response::new(status)
            .with_header("Connection", "close")
            .with_header("Content-Type", "text/plain")
            .with_body(Bytes::copy_from_slice(message.as_bytes()))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Serialize to wire format. `Content-Length` always equals the body length.
    pub fn to_bytes(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(128 + self.body.len());

        out.extend_from_slice(format!("{} {}\r\n", PROTOCOL_VERSION, self.status).as_bytes());
        for (key, value) in &self.headers {
            if key == "Content-Length" {
                continue;
            }
            out.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
        }
        out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        out.put_slice(b"\r\n");
        out.put_slice(&self.body);
        out
    }
}

/// Status code from the status line of a received response frame
pub fn status_code(frame: &Frame) -> Option<u16> {
    let head = str::from_utf8(&frame.head).ok()?;
    let status_line = head.split("\r\n").next()?;
    status_line.split_whitespace().nth(1)?.parse().ok()
}
