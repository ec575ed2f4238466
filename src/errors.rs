use std::fmt;
use std::io;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors a call or connection can surface.
///
/// Transport-class errors (and timeouts) are normally consumed by the
/// engine's retry loop; everything else reaches the caller's continuation
/// unchanged. The type is `Clone` because a single connection failure has
/// to complete every call that was riding on that connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The connection came apart underneath us.
    #[error("transport error: {0}")]
    Transport(TransportKind),
    /// The per-call deadline elapsed before a response arrived.
    #[error("rpc timed out")]
    Timeout,
    /// Preamble, SASL exchange or connection context could not be completed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    /// The server (or the auth provider) rejected our credentials.
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// The peer violated the wire protocol; fatal for the connection.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// The server answered with an ERROR status. The engine does not retry
    /// these; the caller decides.
    #[error("server error: {0}")]
    Remote(RemoteError),
    /// The server answered with a FATAL status; the connection is closed.
    #[error("fatal server error: {0}")]
    RemoteFatal(RemoteError),
    /// A pending connect was canceled.
    #[error("operation canceled")]
    Canceled,
    /// The engine was shut down before the call completed.
    #[error("engine shut down")]
    Shutdown,
}

/// Classification of the underlying socket failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportKind {
    #[error("connection reset")]
    ConnectionReset,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("unexpected end of stream")]
    Eof,
    #[error("address unreachable")]
    Unreachable,
    #[error("i/o failure")]
    Other,
}

/// An error reported by the server in a response header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    /// Server-side class name of the failure, e.g. a Java exception name.
    pub exception_class_name: String,
    /// Human readable message supplied by the server; may be empty.
    pub error_message: String,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.error_message.is_empty() {
            write!(f, "{}", self.exception_class_name)
        } else {
            write!(f, "{}: {}", self.exception_class_name, self.error_message)
        }
    }
}

impl Error {
    /// Whether the engine's retry machinery may act on this error at all.
    /// `HandshakeFailed` is special cased by the failover policy: it is
    /// retryable against a different endpoint only.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Timeout | Error::HandshakeFailed(_)
        )
    }

    /// True for errors caused by the connection rather than the call.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        use io::ErrorKind::*;
        match err.kind() {
            // read timeouts surface as WouldBlock on unix
            TimedOut | WouldBlock => Error::Timeout,
            ConnectionReset | ConnectionAborted | BrokenPipe => {
                Error::Transport(TransportKind::ConnectionReset)
            }
            ConnectionRefused => Error::Transport(TransportKind::ConnectionRefused),
            UnexpectedEof => Error::Transport(TransportKind::Eof),
            AddrNotAvailable | NotConnected => Error::Transport(TransportKind::Unreachable),
            _ => Error::Transport(TransportKind::Other),
        }
    }
}
