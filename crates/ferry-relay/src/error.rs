//! Error types for the relay session client.

use std::io;

use thiserror::Error;

use crate::frame::FrameType;

/// Relay client errors
#[derive(Debug, Error)]
pub enum RelayError {
    /// Missing credentials, bad relay URL or unusable TLS material
    #[error("relay configuration: {0}")]
    Config(String),

    /// Dial or transport failure on the relay connection
    #[error("relay connection: {0}")]
    Connection(#[source] io::Error),

    /// Peer closed the connection before a complete frame arrived
    #[error("relay connection closed by peer")]
    Closed,

    /// Session handle was used after `close()` or after a fatal error
    #[error("relay session already closed")]
    SessionClosed,

    /// Dial or TLS handshake did not complete in time
    #[error("relay connection timed out")]
    Timeout,

    /// TLS setup failure
    #[error("relay TLS: {0}")]
    Tls(#[from] rustls::Error),

    /// Frame stream desynchronized
    #[error("relay protocol: {0}")]
    Protocol(#[from] ProtocolError),

    /// Explicit Error frame sent by the relay
    #[error("relay: {0}")]
    Relay(String),

    /// Local byte source or sink failed during streaming
    #[error("local I/O: {0}")]
    Local(#[source] io::Error),

    /// Inbound transfer is longer than the configured limit
    #[error("transfer exceeds limit of {limit} bytes")]
    LimitExceeded {
        /// Configured limit in bytes
        limit: u64,
    },
}

/// Protocol violations. Any of these is fatal to the connection it happened on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame header carried a type tag outside the known set
    #[error("unknown frame type: 0x{0:02X}")]
    UnknownFrameType(u8),

    /// A known frame arrived where the exchange does not allow it
    #[error("unexpected {got:?} frame while waiting for {expected}")]
    UnexpectedFrame {
        /// What the exchange was waiting for
        expected: &'static str,
        /// What actually arrived
        got: FrameType,
    },

    /// Payload length does not fit the frame type
    #[error("malformed {frame:?} payload: {reason}")]
    MalformedPayload {
        /// Frame carrying the bad payload
        frame: FrameType,
        /// What was wrong with it
        reason: &'static str,
    },

    /// Payload longer than the 32-bit length field can describe
    #[error("payload of {0} bytes exceeds frame length field")]
    PayloadTooLarge(usize),

    /// An earlier violation left the frame boundaries unknown
    #[error("frame stream desynchronized by an earlier error")]
    Desynchronized,
}

impl RelayError {
    /// Whether a fresh attempt (new session id, new connection) may succeed.
    ///
    /// Configuration and protocol errors never recover by retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RelayError::Connection(_) | RelayError::Closed | RelayError::Timeout
        )
    }

    /// Recover a relay error carried inside an `io::Error` by [`crate::UploadStream`].
    pub fn from_io(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<RelayError>()) {
            match err.into_inner().map(|inner| inner.downcast::<RelayError>()) {
                Some(Ok(relay)) => *relay,
                _ => RelayError::Closed,
            }
        } else if err.kind() == io::ErrorKind::UnexpectedEof {
            RelayError::Closed
        } else {
            RelayError::Connection(err)
        }
    }
}

impl From<RelayError> for io::Error {
    fn from(err: RelayError) -> Self {
        let kind = match &err {
            RelayError::Closed => io::ErrorKind::UnexpectedEof,
            RelayError::SessionClosed => io::ErrorKind::NotConnected,
            RelayError::Timeout => io::ErrorKind::TimedOut,
            RelayError::Protocol(_) => io::ErrorKind::InvalidData,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
