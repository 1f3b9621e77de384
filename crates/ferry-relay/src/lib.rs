//! # Ferry Relay
//!
//! Relay session client for Ferry.
//!
//! This crate provides:
//! - Length-prefixed framing over a TLS byte stream
//! - Relay authentication and download/upload registration
//! - A download session that streams a local source as Data frames
//! - An upload stream exposing inbound Data frames as [`tokio::io::AsyncRead`]
//!
//! Every registration dials its own connection, so a [`RelayClient`] can be
//! cloned into as many concurrent tasks as needed.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod download;
pub mod error;
pub mod frame;
pub mod session_id;
pub mod tls;
pub mod upload;

use std::time::Duration;

pub use client::{
    Credentials, RelayClient, RelayStream, Registration, SessionKind, TransferOptions, authenticate,
    register,
};
pub use download::DownloadSession;
pub use error::{ProtocolError, RelayError};
pub use frame::{Frame, FrameDecoder, FrameType, encode_frame, read_frame, write_frame};
pub use session_id::{SESSION_ID_FIELD_LEN, SessionId, registration_payload};
pub use tls::{TlsOptions, client_config, client_config_with_roots};
pub use upload::UploadStream;

/// Relay TLS port used when the URL names none
pub const DEFAULT_RELAY_PORT: u16 = 5349;

/// Upper bound for the TCP connect and, separately, the TLS handshake
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bytes per Data frame (32 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;
