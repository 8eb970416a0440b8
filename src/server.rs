//! TCP listener and per-connection supervisor.
//!
//! Every accepted connection runs in its own tokio task. The supervisor
//! loops read frame → parse → dispatch → write response until the peer
//! disconnects, a read times out, or a response requires the connection
//! to close.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace, warn};

use crate::config::{Config, ConfigError};
use crate::connection::{ConnState, ConnectionTracker, TimeoutPolicy};
use crate::frame::{FrameError, FrameReader};
use crate::handler::{self, Outcome};
use crate::request::Request;
use crate::storage::FileStore;

pub type ServerError = Box<dyn std::error::Error + Send + Sync>;

/// Server instance
pub struct Server {
    config: Config,
    store: Arc<FileStore>,
    tracker: ConnectionTracker,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        let store = FileStore::new(config.root.clone());

        Server {
            config,
            store,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Shared active-connection count
    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Bind the listener and accept connections until the process exits
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Resolve the configured host and bind a listening socket
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let address = self.config.address();
        let mut last_error = None;
        let mut bound = None;

        // First resolved address that binds wins
        for addr in tokio::net::lookup_host(address.as_str()).await? {
            match create_listener(addr, self.config.backlog) {
                Ok(listener) => {
                    bound = Some(listener);
                    break;
                }
                Err(e) => {
                    debug!(addr = %addr, error = %e, "Bind attempt failed");
                    last_error = Some(e);
                }
            }
        }

        let listener = match (bound, last_error) {
            (Some(listener), _) => listener,
            (None, Some(e)) => return Err(e.into()),
            (None, None) => return Err(ConfigError::InvalidAddress(address).into()),
        };
        info!(
            address = %listener.local_addr()?,
            root = %self.store.root().display(),
            "Server listening"
        );
        Ok(listener)
    }

    /// Accept connections on `listener`, one supervisor task each
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let store = Arc::clone(&self.store);
                    let tracker = self.tracker.clone();
                    let policy = self.config.timeouts;

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, store, tracker, policy).await {
                            debug!(peer = %peer, error = %e, "Connection error");
                        }
                        debug!(peer = %peer, "Connection closed");
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Create a non-blocking listener with SO_REUSEADDR and the given backlog.
fn create_listener(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;

    TcpListener::from_std(socket.into())
}

/// Serve one connection until it reaches `ConnState::Closing`.
///
/// The connection holds a slot in `tracker` for as long as this future runs,
/// including when it returns early with an error.
pub async fn handle_connection<S>(
    stream: S,
    store: Arc<FileStore>,
    tracker: ConnectionTracker,
    policy: TimeoutPolicy,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _guard = tracker.track();
    debug!(active = tracker.active(), "Connection opened");

    let (reader, mut writer) = tokio::io::split(stream);
    let mut frames = FrameReader::new(reader);
    let mut state = ConnState::Active;

    while state == ConnState::Active {
        let timeout = policy.timeout_for(tracker.active());
        trace!(?timeout, "Awaiting request");

        let Some(outcome) = next_outcome(&mut frames, &store, timeout).await else {
            state = ConnState::Closing;
            continue;
        };

        writer.write_all(&outcome.response.to_bytes()).await?;
        writer.flush().await?;

        if outcome.close {
            state = ConnState::Closing;
        }
    }

    // Peer may already be gone
    let _ = writer.shutdown().await;
    Ok(())
}

/// Read and answer one request. `None` means close without responding.
async fn next_outcome<S: AsyncRead + Unpin>(
    frames: &mut FrameReader<ReadHalf<S>>,
    store: &FileStore,
    timeout: std::time::Duration,
) -> Option<Outcome> {
    let frame = match frames.next_frame(timeout).await {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            trace!("Connection closed by client");
            return None;
        }
        Err(e) if e.is_protocol_error() => {
            warn!(error = %e, "Malformed frame");
            return Some(handler::bad_request());
        }
        Err(FrameError::TimedOut(after)) => {
            warn!(?after, "Read timed out");
            return None;
        }
        Err(e) => {
            debug!(error = %e, "Read failed");
            return None;
        }
    };

    let outcome = match Request::parse(&frame) {
        Ok(request) => {
            let outcome = handler::dispatch(&request, store).await;
            debug!(
                method = request.method.as_str(),
                path = %request.path,
                status = outcome.response.status.code(),
                bytes = outcome.response.body.len(),
                close = outcome.close,
                "Request served"
            );
            outcome
        }
        Err(e) => {
            warn!(error = %e, "Malformed request");
            handler::bad_request()
        }
    };

    Some(outcome)
}
