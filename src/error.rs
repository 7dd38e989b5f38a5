//! Error types for cqlmux.

use std::net::SocketAddr;

use thiserror::Error;

/// Main error type for all transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Frame header/body inconsistency or unrecognized version byte.
    ///
    /// Connection-fatal: once framing is off, nothing later on the same
    /// transport can be trusted.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// I/O error on the underlying transport (read or write).
    ///
    /// Connection-fatal; fails all outstanding streams exactly once.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection faulted while a request was outstanding.
    ///
    /// This is what individual callers see; the raw cause stays with the
    /// connection for reconnection bookkeeping.
    #[error("connection broken: {0}")]
    ConnectionBroken(String),

    /// A single request's timeout fired. Local to one stream.
    #[error("request timed out")]
    ConnectionTimeout,

    /// No free stream id on this connection. Backpressure, not a fault:
    /// route to another connection or retry later.
    #[error("all stream ids in use")]
    StreamsExhausted,

    /// The pool has no live connections to its host.
    #[error("no live connections available")]
    NoConnectionsAvailable,

    /// Malformed textual token.
    #[error("invalid token string: {0}")]
    TokenParse(String),

    /// Tokens from different partitioners were compared or mixed in a ring.
    #[error("tokens from different partitioners cannot be compared")]
    IncompatiblePartitioner,

    /// The host demands authentication but no provider can serve it.
    /// Fatal to that connection attempt only.
    #[error("authentication required by {0} but unavailable")]
    AuthenticationRequired(SocketAddr),
}

impl TransportError {
    /// Whether this error condemns the whole connection (as opposed to a
    /// single request or a caller-input problem).
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::MalformedFrame(_)
                | TransportError::Io(_)
                | TransportError::ConnectionBroken(_)
        )
    }
}

/// Result type alias using TransportError.
pub type Result<T> = std::result::Result<T, TransportError>;
