//! Relay session identifiers and the registration payload layout.

use std::fmt;

use rand::RngCore;
use rand::rngs::OsRng;

/// Width of the zero-padded session id field in a registration payload
pub const SESSION_ID_FIELD_LEN: usize = 36;

/// Opaque per-attempt session token.
///
/// Generated ids are 128 random bits rendered as 32 lowercase hex characters.
/// A fresh id is used for every registration attempt; ids are never reused.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random session id
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Wrap an externally chosen id.
    ///
    /// Ids longer than [`SESSION_ID_FIELD_LEN`] bytes are truncated on the wire.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The fixed-width wire field: id bytes, zero-padded or truncated to 36 bytes
    pub fn to_field(&self) -> [u8; SESSION_ID_FIELD_LEN] {
        let mut field = [0u8; SESSION_ID_FIELD_LEN];
        let bytes = self.0.as_bytes();
        let n = bytes.len().min(SESSION_ID_FIELD_LEN);
        field[..n].copy_from_slice(&bytes[..n]);
        field
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

/// Build a RegisterDownload / RegisterUpload payload.
///
/// Layout: 36-byte session id field followed by the raw filename bytes.
pub fn registration_payload(session_id: &SessionId, filename: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(SESSION_ID_FIELD_LEN + filename.len());
    payload.extend_from_slice(&session_id.to_field());
    payload.extend_from_slice(filename.as_bytes());
    payload
}
