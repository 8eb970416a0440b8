//! Command-script client.
//!
//! Replays a line-oriented command file over one keep-alive connection:
//!
//! ```text
//! client_get  /docs/index.html localhost 8080
//! client_post photo.png        localhost 8080
//! ```
//!
//! Each line names a command, a file path, and the host and port the
//! request is meant for. After the last line a `Connection: close`
//! request ends the session.

use bytes::BytesMut;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::frame::{Frame, FrameError, FrameReader};
use crate::response::{status_code, Status};

/// Script command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Get,
    Post,
}

/// One parsed script line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub file_path: String,
    pub host: String,
    pub port: u16,
}

impl Command {
    /// Parse `<command> <file_path> <host> <port>`; extra tokens are ignored.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let [command, file_path, host, port, ..] = tokens[..] else {
            return Err(CommandError::TooFewFields(tokens.len()));
        };

        let kind = match command {
            "client_get" => CommandKind::Get,
            "client_post" => CommandKind::Post,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        let port = port
            .parse()
            .map_err(|_| CommandError::InvalidPort(port.to_string()))?;

        Ok(Command {
            kind,
            file_path: file_path.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

/// Script line errors; the line is skipped
#[derive(Debug, Clone, PartialEq)]
pub enum CommandError {
    TooFewFields(usize),
    Unknown(String),
    InvalidPort(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::TooFewFields(n) => {
                write!(f, "Invalid command format: expected 4 fields, got {}", n)
            }
            CommandError::Unknown(cmd) => write!(f, "Unknown command: {}", cmd),
            CommandError::InvalidPort(port) => write!(f, "Invalid port: {}", port),
        }
    }
}

impl std::error::Error for CommandError {}

/// Errors while exchanging a request with the server
#[derive(Debug)]
pub enum ClientError {
    Io(io::Error),
    Frame(FrameError),
    /// Server closed the connection before a full response arrived
    ConnectionClosed,
    /// Local file to upload does not exist
    MissingLocalFile(PathBuf),
    /// Path has no file name to save a download under
    NoFileName(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Io(e) => write!(f, "I/O error: {}", e),
            ClientError::Frame(e) => write!(f, "Bad response: {}", e),
            ClientError::ConnectionClosed => write!(f, "Connection closed by server"),
            ClientError::MissingLocalFile(path) => {
                write!(f, "File {} does not exist", path.display())
            }
            ClientError::NoFileName(path) => write!(f, "No file name in path '{}'", path),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        ClientError::Io(e)
    }
}

impl From<FrameError> for ClientError {
    fn from(e: FrameError) -> Self {
        ClientError::Frame(e)
    }
}

impl ClientError {
    /// The connection is unusable after this error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Frame(_) | ClientError::ConnectionClosed
        )
    }
}

/// Client settings
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Where downloaded files are saved
    pub download_dir: PathBuf,
    /// Local paths in `client_post` lines are resolved against this
    pub upload_dir: PathBuf,
    /// Bound on each read while waiting for a response
    pub read_timeout: Duration,
    /// Pause between script commands
    pub pause: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            download_dir: PathBuf::from("."),
            upload_dir: PathBuf::from("."),
            read_timeout: Duration::from_secs(30),
            pause: Duration::from_millis(500),
        }
    }
}

/// One request/response exchange
#[derive(Debug)]
pub struct Exchange {
    pub status: Option<u16>,
    pub response: Frame,
    /// Where a successful download was written
    pub saved: Option<PathBuf>,
}

impl Exchange {
    pub fn is_ok(&self) -> bool {
        self.status.and_then(Status::from_code) == Some(Status::Ok)
    }
}

/// Totals for a replayed script
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScriptReport {
    pub executed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// A single keep-alive connection to the server
pub struct Client<S> {
    frames: FrameReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    options: ClientOptions,
}

impl Client<TcpStream> {
    pub async fn connect(host: &str, port: u16, options: ClientOptions) -> io::Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        info!(host, port, "Connected");
        Ok(Client::new(stream, options))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    pub fn new(stream: S, options: ClientOptions) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Client {
            frames: FrameReader::new(reader),
            writer,
            options,
        }
    }

    /// Download `file_path`, saving it under its base name on success.
    pub async fn get(&mut self, file_path: &str, host: &str) -> Result<Exchange, ClientError> {
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: keep-alive\r\n\r\n",
            file_path, host
        );
        let mut exchange = self.exchange(request.as_bytes()).await?;

        if exchange.is_ok() {
            let name = Path::new(file_path)
                .file_name()
                .ok_or_else(|| ClientError::NoFileName(file_path.to_string()))?;
            let target = self.options.download_dir.join(name);
            tokio::fs::write(&target, &exchange.response.body).await?;
            info!(path = %target.display(), bytes = exchange.response.body.len(), "File saved");
            exchange.saved = Some(target);
        } else {
            warn!(file_path, status = ?exchange.status, "Could not retrieve file");
        }
        Ok(exchange)
    }

    /// Upload the local file at `file_path` to the same path on the server.
    pub async fn post(&mut self, file_path: &str, host: &str) -> Result<Exchange, ClientError> {
        let local = self.options.upload_dir.join(file_path);
        let contents = match tokio::fs::read(&local).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ClientError::MissingLocalFile(local));
            }
            Err(e) => return Err(e.into()),
        };

        let mut request = BytesMut::from(
            format!(
                "POST {} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n",
                file_path,
                host,
                contents.len()
            )
            .as_bytes(),
        );
        request.extend_from_slice(&contents);

        let exchange = self.exchange(&request).await?;
        info!(
            file_path,
            status = ?exchange.status,
            body = %String::from_utf8_lossy(&exchange.response.body),
            "Upload answered"
        );
        Ok(exchange)
    }

    /// Ask the server to close the connection and wait for it to do so.
    pub async fn close(mut self, host: &str) -> Result<(), ClientError> {
        let request = format!("GET / HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", host);
        self.writer.write_all(request.as_bytes()).await?;
        self.writer.flush().await?;

        // Drain the final response, then expect end of stream
        while self
            .frames
            .next_frame(self.options.read_timeout)
            .await?
            .is_some()
        {}
        debug!("Connection closed");
        Ok(())
    }

    /// Execute every line of `script`, then close the connection.
    pub async fn run_script(
        mut self,
        script: &str,
        fallback_host: &str,
    ) -> Result<ScriptReport, ClientError> {
        let mut report = ScriptReport::default();
        let mut last_host = fallback_host.to_string();

        for (number, line) in script.lines().enumerate() {
            let command = match Command::parse(line) {
                Ok(command) => command,
                Err(e) => {
                    warn!(line = number + 1, error = %e, "Skipping line");
                    report.skipped += 1;
                    continue;
                }
            };

            let result = match command.kind {
                CommandKind::Get => self.get(&command.file_path, &command.host).await,
                CommandKind::Post => self.post(&command.file_path, &command.host).await,
            };
            last_host = command.host;

            match result {
                Ok(exchange) if exchange.is_ok() => report.executed += 1,
                Ok(_) => report.failed += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(line = number + 1, error = %e, "Command failed");
                    report.failed += 1;
                }
            }

            if !self.options.pause.is_zero() {
                tokio::time::sleep(self.options.pause).await;
            }
        }

        self.close(&last_host).await?;
        Ok(report)
    }

    async fn exchange(&mut self, request: &[u8]) -> Result<Exchange, ClientError> {
        self.writer.write_all(request).await?;
        self.writer.flush().await?;

        let response = self
            .frames
            .next_frame(self.options.read_timeout)
            .await?
            .ok_or(ClientError::ConnectionClosed)?;
        debug!(head = %String::from_utf8_lossy(&response.head), "Response headers");

        Ok(Exchange {
            status: status_code(&response),
            response,
            saved: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::server::Server;
    use crate::storage::scratch_dir;
    use std::sync::Arc;
    use tokio_test::io::Builder;

    fn options(download_dir: PathBuf, upload_dir: PathBuf) -> ClientOptions {
        ClientOptions {
            download_dir,
            upload_dir,
            read_timeout: Duration::from_secs(5),
            pause: Duration::ZERO,
        }
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(
            Command::parse("client_get /index.html localhost 8080").unwrap(),
            Command {
                kind: CommandKind::Get,
                file_path: "/index.html".to_string(),
                host: "localhost".to_string(),
                port: 8080,
            }
        );
        assert_eq!(
            Command::parse("  client_post photo.png 10.0.0.2 9000 trailing").unwrap().kind,
            CommandKind::Post
        );
    }

    #[test]
    fn test_parse_command_errors() {
        assert_eq!(Command::parse(""), Err(CommandError::TooFewFields(0)));
        assert_eq!(
            Command::parse("client_get /a.txt localhost"),
            Err(CommandError::TooFewFields(3))
        );
        assert_eq!(
            Command::parse("client_put /a.txt localhost 8080"),
            Err(CommandError::Unknown("client_put".to_string()))
        );
        assert_eq!(
            Command::parse("client_get /a.txt localhost http"),
            Err(CommandError::InvalidPort("http".to_string()))
        );
    }

    #[tokio::test]
    async fn test_get_saves_body() {
        let downloads = scratch_dir("client-get");
        let mock = Builder::new()
            .write(b"GET /docs/page.html HTTP/1.1\r\nHost: localhost\r\nConnection: keep-alive\r\n\r\n")
            .read(b"HTTP/1.1 200 OK\r\nConnection: keep-alive\r\nContent-Type: text/html\r\nContent-Length: 4\r\n\r\n<p/>")
            .build();
        let mut client = Client::new(mock, options(downloads.clone(), downloads.clone()));

        let exchange = client.get("/docs/page.html", "localhost").await.unwrap();
        assert!(exchange.is_ok());
        assert_eq!(exchange.saved, Some(downloads.join("page.html")));
        assert_eq!(std::fs::read(downloads.join("page.html")).unwrap(), b"<p/>");
    }

    #[tokio::test]
    async fn test_get_not_found_saves_nothing() {
        let downloads = scratch_dir("client-get-404");
        let mock = Builder::new()
            .write(b"GET /gone.txt HTTP/1.1\r\nHost: localhost\r\nConnection: keep-alive\r\n\r\n")
            .read(b"HTTP/1.1 404 Not Found\r\nConnection: close\r\nContent-Length: 14\r\n\r\nFile Not Found")
            .build();
        let mut client = Client::new(mock, options(downloads.clone(), downloads.clone()));

        let exchange = client.get("/gone.txt", "localhost").await.unwrap();
        assert_eq!(exchange.status, Some(404));
        assert!(!exchange.is_ok());
        assert!(exchange.saved.is_none());
        assert!(!downloads.join("gone.txt").exists());
    }

    #[tokio::test]
    async fn test_post_sends_file() {
        let uploads = scratch_dir("client-post");
        std::fs::write(uploads.join("note.txt"), b"abc").unwrap();
        let mock = Builder::new()
            .write(b"POST note.txt HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/octet-stream\r\nContent-Length: 3\r\nConnection: keep-alive\r\n\r\nabc")
            .read(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .build();
        let mut client = Client::new(mock, options(uploads.clone(), uploads));

        let exchange = client.post("note.txt", "localhost").await.unwrap();
        assert!(exchange.is_ok());
        assert_eq!(&exchange.response.body[..], b"ok");
    }

    #[tokio::test]
    async fn test_post_missing_local_file() {
        let uploads = scratch_dir("client-post-missing");
        let mock = Builder::new().build();
        let mut client = Client::new(mock, options(uploads.clone(), uploads));

        let err = client.post("absent.bin", "localhost").await.unwrap_err();
        assert!(matches!(err, ClientError::MissingLocalFile(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_server_hangup_is_fatal() {
        let dir = scratch_dir("client-hangup");
        let mock = Builder::new()
            .write(b"GET /a.txt HTTP/1.1\r\nHost: h\r\nConnection: keep-alive\r\n\r\n")
            .build();
        let mut client = Client::new(mock, options(dir.clone(), dir));

        let err = client.get("/a.txt", "h").await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_script_against_server() {
        let served = scratch_dir("client-script-served");
        let local = scratch_dir("client-script-local");
        std::fs::write(served.join("remote.txt"), b"from the server").unwrap();
        std::fs::write(local.join("upload.png"), b"\x89PNG\r\n\r\n").unwrap();

        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            root: served.clone(),
            ..Config::default()
        };
        let server = Arc::new(Server::new(config));
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = Arc::clone(&server);
        tokio::spawn(async move {
            let _ = serving.serve(listener).await;
        });

        let script = format!(
            "client_get /remote.txt localhost {port}\n\
             client_post upload.png localhost {port}\n\
             not enough\n\
             client_get /missing.txt localhost {port}\n\
             client_post nowhere.bin localhost {port}\n\
             client_delete /remote.txt localhost {port}\n",
            port = addr.port()
        );

        let opts = options(local.clone(), local.clone());
        let client = Client::connect("127.0.0.1", addr.port(), opts).await.unwrap();
        let report = client.run_script(&script, "127.0.0.1").await.unwrap();

        assert_eq!(
            report,
            ScriptReport {
                executed: 2,
                skipped: 2,
                failed: 2,
            }
        );
        assert_eq!(std::fs::read(local.join("remote.txt")).unwrap(), b"from the server");
        assert_eq!(std::fs::read(served.join("upload.png")).unwrap(), b"\x89PNG\r\n\r\n");

        for _ in 0..200 {
            if server.tracker().active() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server still tracks {} connections", server.tracker().active());
    }
}
