//! Codec trait and implementations for serializing/deserializing values.
//!
//! The attendance core never talks to a socket itself; whatever transport
//! sits in front of it (HTTP handler, websocket, message queue) picks a
//! [`Codec`] to move [`RosterDelta`](crate::RosterDelta)s and requests
//! across the wire. [`JsonCodec`] is also what gives presence tokens their
//! serialized form, so the barcode payload is plain JSON.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// A codec that can encode Rust values to bytes and decode bytes back.
///
/// `Send + Sync + 'static` so a single codec can be shared by every task
/// that publishes roster deltas.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if the value cannot be represented
    /// in this format.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] backed by `serde_json`.
///
/// ```rust
/// use rollcall_protocol::{Codec, JsonCodec, RosterCounts};
///
/// let codec = JsonCodec;
/// let counts = RosterCounts { enrolled: 30, present: 12, late: 2 };
///
/// let bytes = codec.encode(&counts).unwrap();
/// let decoded: RosterCounts = codec.decode(&bytes).unwrap();
/// assert_eq!(counts, decoded);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Encodes a value straight to a JSON string.
    ///
    /// Used for payloads that are rendered as text (the barcode contents).
    pub fn encode_str<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<String, ProtocolError> {
        serde_json::to_string(value).map_err(ProtocolError::Encode)
    }
}

impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
