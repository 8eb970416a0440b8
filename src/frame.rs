//! Stream framing for requests and responses.
//!
//! A frame is a header block terminated by `\r\n\r\n`, followed by exactly
//! `Content-Length` bytes of body when that header is present. Bytes that
//! arrive past the end of a frame stay buffered and start the next one.

use bytes::{Buf, Bytes, BytesMut};
use std::io;
use std::str;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::request::split_header_line;

/// Maximum number of bytes requested from the socket per read
pub const CHUNK_SIZE: usize = 1024;

/// Separates the header block from the body
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Largest header block accepted before the terminator must appear
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// One complete frame read off the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Header block, without the terminator
    pub head: Bytes,
    /// Body, exactly as long as the declared `Content-Length`
    pub body: Bytes,
}

/// Framing errors
#[derive(Debug)]
pub enum FrameError {
    /// Underlying read failed
    Io(io::Error),
    /// No bytes arrived within the read timeout
    TimedOut(Duration),
    /// Header block is not valid UTF-8
    InvalidHead,
    /// `Content-Length` value is not a usable non-negative integer
    InvalidContentLength(String),
    /// No header terminator within `MAX_HEAD_SIZE` bytes
    HeadTooLarge(usize),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Io(e) => write!(f, "Read failed: {}", e),
            FrameError::TimedOut(after) => write!(f, "No data within {:?}", after),
            FrameError::InvalidHead => write!(f, "Header block is not valid UTF-8"),
            FrameError::InvalidContentLength(value) => {
                write!(f, "Invalid Content-Length: {}", value)
            }
            FrameError::HeadTooLarge(limit) => {
                write!(f, "Header block exceeds {} bytes", limit)
            }
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FrameError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        FrameError::Io(e)
    }
}

impl FrameError {
    /// Whether the peer deserves a `400 Bad Request` before the connection closes
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            FrameError::InvalidHead
                | FrameError::InvalidContentLength(_)
                | FrameError::HeadTooLarge(_)
        )
    }
}

/// Accumulates bytes from a reader and cuts them into frames.
pub struct FrameReader<R> {
    inner: R,
    buffer: BytesMut,
    /// Offset the next terminator search starts from
    scanned: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(CHUNK_SIZE),
            scanned: 0,
        }
    }

    /// Bytes read from the stream but not yet part of a returned frame
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Read the next complete frame.
    ///
    /// Returns `Ok(None)` when the peer closes the stream before a frame is
    /// complete. `timeout` bounds every individual read, not the whole frame.
    pub async fn next_frame(&mut self, timeout: Duration) -> Result<Option<Frame>, FrameError> {
        loop {
            if let Some(head_len) = find_terminator(&self.buffer, self.scanned) {
                let head = str::from_utf8(&self.buffer[..head_len])
                    .map_err(|_| FrameError::InvalidHead)?;
                let body_len = content_length(head)?.unwrap_or(0);
                let total = head_len
                    .checked_add(HEADER_TERMINATOR.len())
                    .and_then(|n| n.checked_add(body_len))
                    .ok_or_else(|| FrameError::InvalidContentLength(body_len.to_string()))?;

                while self.buffer.len() < total {
                    if self.read_chunk(timeout).await? == 0 {
                        trace!(
                            missing = total - self.buffer.len(),
                            "Stream closed inside body"
                        );
                        return Ok(None);
                    }
                }

                let mut frame = self.buffer.split_to(total);
                self.scanned = 0;
                let head = frame.split_to(head_len).freeze();
                frame.advance(HEADER_TERMINATOR.len());

                return Ok(Some(Frame {
                    head,
                    body: frame.freeze(),
                }));
            }

            if self.buffer.len() > MAX_HEAD_SIZE {
                return Err(FrameError::HeadTooLarge(MAX_HEAD_SIZE));
            }
            // A terminator may straddle the old end and the next chunk
            self.scanned = self
                .buffer
                .len()
                .saturating_sub(HEADER_TERMINATOR.len() - 1);

            if self.read_chunk(timeout).await? == 0 {
                return Ok(None);
            }
        }
    }

    async fn read_chunk(&mut self, timeout: Duration) -> Result<usize, FrameError> {
        let mut chunk = [0u8; CHUNK_SIZE];
        let n = tokio::time::timeout(timeout, self.inner.read(&mut chunk))
            .await
            .map_err(|_| FrameError::TimedOut(timeout))??;

        self.buffer.extend_from_slice(&chunk[..n]);
        trace!(read = n, buffered = self.buffer.len(), "Read chunk");
        Ok(n)
    }
}

/// Position of the first header terminator at or after `from`
pub fn find_terminator(buffer: &[u8], from: usize) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
        .map(|pos| pos + from)
}

/// Declared body length of a header block, `None` when the header is absent
pub fn content_length(head: &str) -> Result<Option<usize>, FrameError> {
    let value = head
        .split("\r\n")
        .skip(1)
        .filter_map(split_header_line)
        .find(|(key, _)| *key == "Content-Length")
        .map(|(_, value)| value);

    match value {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| FrameError::InvalidContentLength(value.to_string())),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio_test::io::Builder;

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_frame_without_body() {
        let mock = Builder::new()
            .read(b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .build();
        let mut reader = FrameReader::new(mock);

        let frame = reader.next_frame(WAIT).await.unwrap().unwrap();
        assert_eq!(&frame.head[..], b"GET /index.html HTTP/1.1\r\nHost: localhost");
        assert!(frame.body.is_empty());

        assert!(reader.next_frame(WAIT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_body_in_three_byte_fragments() {
        let request = b"POST /upload.txt HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello world";
        let mut builder = Builder::new();
        for fragment in request.chunks(3) {
            builder.read(fragment);
        }
        let mut reader = FrameReader::new(builder.build());

        let frame = reader.next_frame(WAIT).await.unwrap().unwrap();
        assert_eq!(&frame.head[..], b"POST /upload.txt HTTP/1.1\r\nContent-Length: 11");
        assert_eq!(&frame.body[..], b"hello world");
        assert!(reader.buffered().is_empty());
    }

    #[tokio::test]
    async fn test_body_larger_than_chunk() {
        let body = vec![0xabu8; CHUNK_SIZE * 4 + 17];
        let mut request = format!(
            "POST /blob.bin HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        request.extend_from_slice(&body);

        let mut builder = Builder::new();
        for fragment in request.chunks(CHUNK_SIZE) {
            builder.read(fragment);
        }
        let mut reader = FrameReader::new(builder.build());

        let frame = reader.next_frame(WAIT).await.unwrap().unwrap();
        assert_eq!(frame.body.len(), body.len());
        assert_eq!(&frame.body[..], &body[..]);
    }

    #[tokio::test]
    async fn test_surplus_bytes_start_next_frame() {
        let mock = Builder::new()
            .read(b"POST /a.txt HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcGET /a.txt HTTP/1.1\r\n\r\n")
            .build();
        let mut reader = FrameReader::new(mock);

        let first = reader.next_frame(WAIT).await.unwrap().unwrap();
        assert_eq!(&first.body[..], b"abc");
        assert_eq!(reader.buffered(), b"GET /a.txt HTTP/1.1\r\n\r\n");

        let second = reader.next_frame(WAIT).await.unwrap().unwrap();
        assert_eq!(&second.head[..], b"GET /a.txt HTTP/1.1");
        assert!(second.body.is_empty());
    }

    #[tokio::test]
    async fn test_eof_before_terminator() {
        let mock = Builder::new().read(b"GET /a.txt HTTP/1.1\r\n").build();
        let mut reader = FrameReader::new(mock);

        assert!(reader.next_frame(WAIT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_inside_body() {
        let mock = Builder::new()
            .read(b"POST /a.txt HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc")
            .build();
        let mut reader = FrameReader::new(mock);

        assert!(reader.next_frame(WAIT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_content_length() {
        let mock = Builder::new()
            .read(b"POST /a.txt HTTP/1.1\r\nContent-Length: ten\r\n\r\n")
            .build();
        let mut reader = FrameReader::new(mock);

        let err = reader.next_frame(WAIT).await.unwrap_err();
        assert!(matches!(err, FrameError::InvalidContentLength(ref v) if v == "ten"));
        assert!(err.is_protocol_error());
    }

    #[tokio::test]
    async fn test_invalid_utf8_head() {
        let mock = Builder::new().read(b"GET /\xff\xfe HTTP/1.1\r\n\r\n").build();
        let mut reader = FrameReader::new(mock);

        let err = reader.next_frame(WAIT).await.unwrap_err();
        assert!(matches!(err, FrameError::InvalidHead));
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server);

        let err = reader
            .next_frame(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::TimedOut(_)));
        assert!(!err.is_protocol_error());
        drop(client);
    }

    #[tokio::test]
    async fn test_timeout_applies_per_read() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server);

        let writer = tokio::spawn(async move {
            for piece in [&b"GET /slow"[..], &b".txt HTTP/1.1\r\n"[..], &b"\r\n"[..]] {
                tokio::time::sleep(Duration::from_millis(30)).await;
                client.write_all(piece).await.unwrap();
            }
            client
        });

        let frame = reader
            .next_frame(Duration::from_millis(500))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&frame.head[..], b"GET /slow.txt HTTP/1.1");
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_overflowing_content_length() {
        let mock = Builder::new()
            .read(b"POST /a.txt HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\nabc")
            .build();
        let mut reader = FrameReader::new(mock);

        let err = reader.next_frame(WAIT).await.unwrap_err();
        assert!(matches!(err, FrameError::InvalidContentLength(_)));
        assert!(err.is_protocol_error());
    }

    #[tokio::test]
    async fn test_terminator_split_across_reads() {
        let mock = Builder::new()
            .read(b"GET /a.txt HTTP/1.1\r\n\r")
            .read(b"\n")
            .read(b"GET /b.txt HTTP/1.1\r")
            .read(b"\n\r\n")
            .build();
        let mut reader = FrameReader::new(mock);

        let first = reader.next_frame(WAIT).await.unwrap().unwrap();
        assert_eq!(&first.head[..], b"GET /a.txt HTTP/1.1");
        let second = reader.next_frame(WAIT).await.unwrap().unwrap();
        assert_eq!(&second.head[..], b"GET /b.txt HTTP/1.1");
        assert!(reader.buffered().is_empty());
    }

    #[tokio::test]
    async fn test_head_without_terminator_is_capped() {
        let mut head = b"GET /a.txt HTTP/1.1\r\nX-Pad: ".to_vec();
        head.resize(MAX_HEAD_SIZE + 1, b'a');

        let mut builder = Builder::new();
        for fragment in head.chunks(CHUNK_SIZE) {
            builder.read(fragment);
        }
        let mut reader = FrameReader::new(builder.build());

        let err = reader.next_frame(WAIT).await.unwrap_err();
        assert!(matches!(err, FrameError::HeadTooLarge(MAX_HEAD_SIZE)));
        assert!(err.is_protocol_error());
    }

    #[test]
    fn test_find_terminator() {
        assert_eq!(find_terminator(b"GET / HTTP/1.1\r\n\r\nbody", 0), Some(14));
        assert_eq!(find_terminator(b"GET / HTTP/1.1\r\n\r\nbody", 12), Some(14));
        assert_eq!(find_terminator(b"GET / HTTP/1.1\r\n\r\nbody", 15), None);
        assert_eq!(find_terminator(b"GET / HTTP/1.1\r\n", 0), None);
        assert_eq!(find_terminator(b"", 0), None);
        assert_eq!(find_terminator(b"ab", 10), None);
    }

    #[test]
    fn test_content_length_lookup() {
        assert_eq!(
            content_length("POST /a HTTP/1.1\r\nHost: x\r\nContent-Length: 42").unwrap(),
            Some(42)
        );
        assert_eq!(content_length("GET /a HTTP/1.1\r\nHost: x").unwrap(), None);
        // Header names are case-sensitive
        assert_eq!(
            content_length("POST /a HTTP/1.1\r\ncontent-length: 42").unwrap(),
            None
        );
        assert!(content_length("POST /a HTTP/1.1\r\nContent-Length: -1").is_err());
    }
}
