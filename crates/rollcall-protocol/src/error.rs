//! Error types for the protocol layer.
//!
//! Each Rollcall crate defines its own error enum. A `ProtocolError`
//! always means something went wrong turning values into bytes or back,
//! or building the key material that signs tokens.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust value).
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A scanned token could not be parsed: not JSON, missing fields,
    /// wrong field types, or a nonce/signature of the wrong length.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// The signing key is unusable (bad hex, too short).
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
}
