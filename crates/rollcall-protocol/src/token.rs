//! Presence tokens: the signed, short-lived code shown on the display.
//!
//! A token is self-verifying. The signature is an HMAC-SHA256 over
//! `sessionId:issuedAtMillis:nonce` under a key that only the issuing side
//! holds, so a forged or edited token is rejected without any store
//! lookup. Only "which session" and "already marked" need state.
//!
//! Serialized form (the barcode payload):
//!
//! ```json
//! {
//!   "sessionId": "0d9c1f1e-5a41-4a8e-9f0e-0b6a7c4b9d21",
//!   "issuedAtMillis": 1760601600000,
//!   "nonce": "3f1c9a0b7e5d42c8a1f06b9e2d4c7a18",
//!   "signature": "9b2e...64 hex chars...",
//!   "expiresAt": "2025-10-16T08:02:00Z"
//! }
//! ```

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{Codec, JsonCodec, ProtocolError, SessionId};

type HmacSha256 = Hmac<Sha256>;

/// Lifetime of a freshly issued token.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(120);

/// Longest lifetime a codec will issue tokens with.
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// 16 random bytes, hex-encoded.
const NONCE_BYTES: usize = 16;
const NONCE_HEX_LEN: usize = NONCE_BYTES * 2;
/// SHA-256 output, hex-encoded.
const SIGNATURE_HEX_LEN: usize = 64;

// ---------------------------------------------------------------------------
// PresenceToken
// ---------------------------------------------------------------------------

/// A decoded presence token.
///
/// Field names on the wire are camelCase; that JSON shape is the contract
/// between the display surface and the scanning client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceToken {
    pub session_id: SessionId,
    pub issued_at_millis: i64,
    /// 32 lowercase hex characters (128 bits of entropy).
    pub nonce: String,
    /// Hex HMAC-SHA256 digest.
    pub signature: String,
    /// `issued_at + ttl`. Not covered by the signature; the verifier only
    /// accepts tokens identical to one the session actually issued.
    pub expires_at: DateTime<Utc>,
}

impl PresenceToken {
    /// Whether the token is past its expiry at `now` (expiry is exclusive).
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// When the token was issued.
    pub fn issued_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.issued_at_millis)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

// ---------------------------------------------------------------------------
// SigningKey
// ---------------------------------------------------------------------------

/// The issuing side's HMAC secret.
///
/// Never serialized and never shown in `Debug` output. It stays with the
/// instructor-facing session control; scanning clients only see tokens.
#[derive(Clone)]
pub struct SigningKey(Vec<u8>);

impl SigningKey {
    /// Shortest accepted key, in bytes.
    pub const MIN_LEN: usize = 16;

    /// Generates a random 256-bit key.
    pub fn generate() -> Self {
        let bytes: [u8; 32] = rand::rng().random();
        Self(bytes.to_vec())
    }

    /// Wraps raw key bytes.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidKey`] if shorter than [`Self::MIN_LEN`].
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, ProtocolError> {
        let bytes = bytes.into();
        if bytes.len() < Self::MIN_LEN {
            return Err(ProtocolError::InvalidKey(format!(
                "key must be at least {} bytes, got {}",
                Self::MIN_LEN,
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// Parses a hex-encoded key (as stored in configuration).
    pub fn from_hex(hex_key: &str) -> Result<Self, ProtocolError> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| ProtocolError::InvalidKey(e.to_string()))?;
        Self::from_bytes(bytes)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// TokenCodec
// ---------------------------------------------------------------------------

/// Issues, serializes, parses, and checks presence tokens.
///
/// Stateless apart from the key: any number of tasks can share one codec
/// behind an `Arc`.
#[derive(Clone)]
pub struct TokenCodec {
    /// HMAC keyed once at construction; cloned per signature.
    mac: HmacSha256,
    ttl: Duration,
    json: JsonCodec,
}

impl TokenCodec {
    /// Creates a codec issuing tokens valid for [`DEFAULT_TOKEN_TTL`].
    pub fn new(key: &SigningKey) -> Result<Self, ProtocolError> {
        let mac = HmacSha256::new_from_slice(&key.0)
            .map_err(|e| ProtocolError::InvalidKey(e.to_string()))?;
        Ok(Self {
            mac,
            ttl: DEFAULT_TOKEN_TTL,
            json: JsonCodec,
        })
    }

    /// Overrides the token lifetime, capped at [`MAX_TOKEN_TTL`].
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl.min(MAX_TOKEN_TTL);
        self
    }

    /// Lifetime of issued tokens.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issues a fresh token for `session_id` at `now`.
    pub fn issue(&self, session_id: SessionId, now: DateTime<Utc>) -> PresenceToken {
        let issued_at_millis = now.timestamp_millis();
        let nonce_bytes: [u8; NONCE_BYTES] = rand::rng().random();
        let nonce = hex::encode(nonce_bytes);
        let signature = hex::encode(self.digest(session_id, issued_at_millis, &nonce));

        let issued_at = DateTime::from_timestamp_millis(issued_at_millis)
            .unwrap_or(now);
        let expires_at = TimeDelta::from_std(self.ttl)
            .ok()
            .and_then(|ttl| issued_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        PresenceToken {
            session_id,
            issued_at_millis,
            nonce,
            signature,
            expires_at,
        }
    }

    /// Serializes a token into its barcode payload.
    pub fn encode(&self, token: &PresenceToken) -> Result<String, ProtocolError> {
        self.json.encode_str(token)
    }

    /// Parses a scanned payload.
    ///
    /// # Errors
    /// [`ProtocolError::MalformedToken`] if the payload is not a token:
    /// bad JSON, missing or mistyped fields, or a nonce/signature of the
    /// wrong shape. A well-formed but forged token parses fine; use
    /// [`verify_signature`](Self::verify_signature) for that.
    pub fn decode(&self, raw: &str) -> Result<PresenceToken, ProtocolError> {
        let token: PresenceToken = self
            .json
            .decode(raw.trim().as_bytes())
            .map_err(|e| ProtocolError::MalformedToken(e.to_string()))?;

        if token.nonce.len() != NONCE_HEX_LEN
            || !token.nonce.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(ProtocolError::MalformedToken(format!(
                "nonce must be {NONCE_HEX_LEN} hex characters"
            )));
        }
        if token.signature.len() != SIGNATURE_HEX_LEN {
            return Err(ProtocolError::MalformedToken(format!(
                "signature must be {SIGNATURE_HEX_LEN} characters"
            )));
        }
        Ok(token)
    }

    /// Recomputes the HMAC over the claimed fields and compares in
    /// constant time. Independent of expiry.
    pub fn verify_signature(&self, token: &PresenceToken) -> bool {
        let Ok(claimed) = hex::decode(&token.signature) else {
            return false;
        };
        let mut mac = self.mac.clone();
        feed(&mut mac, token.session_id, token.issued_at_millis, &token.nonce);
        mac.verify_slice(&claimed).is_ok()
    }

    fn digest(
        &self,
        session_id: SessionId,
        issued_at_millis: i64,
        nonce: &str,
    ) -> Vec<u8> {
        let mut mac = self.mac.clone();
        feed(&mut mac, session_id, issued_at_millis, nonce);
        mac.finalize().into_bytes().to_vec()
    }
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Writes `sessionId:issuedAtMillis:nonce` into the MAC.
fn feed(mac: &mut HmacSha256, session_id: SessionId, issued_at_millis: i64, nonce: &str) {
    mac.update(session_id.to_string().as_bytes());
    mac.update(b":");
    mac.update(issued_at_millis.to_string().as_bytes());
    mac.update(b":");
    mac.update(nonce.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn codec() -> TokenCodec {
        TokenCodec::new(&SigningKey::generate()).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_760_601_600_000).unwrap()
    }

    /// Flips one bit of one ASCII character; the result stays ASCII.
    fn flip_char_bit(s: &str, index: usize) -> String {
        let mut bytes = s.as_bytes().to_vec();
        bytes[index] ^= 0x01;
        String::from_utf8(bytes).unwrap()
    }

    // =====================================================================
    // issue()
    // =====================================================================

    #[test]
    fn test_issue_sets_expiry_to_ttl_after_issuance() {
        let token = codec().issue(SessionId::new(), t0());

        assert_eq!(token.issued_at_millis, t0().timestamp_millis());
        assert_eq!(token.expires_at, t0() + TimeDelta::seconds(120));
    }

    #[test]
    fn test_issue_nonce_is_fixed_length_hex() {
        let token = codec().issue(SessionId::new(), t0());

        assert_eq!(token.nonce.len(), 32);
        assert!(token.nonce.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(token.signature.len(), 64);
    }

    #[test]
    fn test_issue_twice_same_instant_gives_distinct_nonces() {
        let codec = codec();
        let id = SessionId::new();

        let a = codec.issue(id, t0());
        let b = codec.issue(id, t0());

        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.signature, b.signature);
    }

    #[test]
    fn test_with_ttl_changes_expiry() {
        let codec = codec().with_ttl(Duration::from_secs(30));
        let token = codec.issue(SessionId::new(), t0());
        assert_eq!(token.expires_at, t0() + TimeDelta::seconds(30));
    }

    #[test]
    fn test_with_ttl_huge_value_is_capped() {
        let codec = codec().with_ttl(Duration::MAX);
        let token = codec.issue(SessionId::new(), t0());

        assert_eq!(codec.ttl(), MAX_TOKEN_TTL);
        assert_eq!(token.expires_at, t0() + TimeDelta::days(1));
    }

    #[test]
    fn test_issue_near_end_of_time_saturates_expiry() {
        let now = DateTime::<Utc>::MAX_UTC - TimeDelta::seconds(10);
        let token = codec().issue(SessionId::new(), now);

        assert_eq!(token.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(!token.is_expired_at(now));
    }

    // =====================================================================
    // verify_signature()
    // =====================================================================

    #[test]
    fn test_verify_signature_fresh_token_is_valid() {
        let codec = codec();
        let token = codec.issue(SessionId::new(), t0());
        assert!(codec.verify_signature(&token));
    }

    #[test]
    fn test_verify_signature_rejects_every_session_id_bit_flip() {
        let codec = codec();
        let token = codec.issue(SessionId::new(), t0());

        for bit in 0..128 {
            let mut forged = token.clone();
            forged.session_id =
                SessionId(Uuid::from_u128(token.session_id.0.as_u128() ^ (1 << bit)));
            assert!(!codec.verify_signature(&forged), "bit {bit} accepted");
        }
    }

    #[test]
    fn test_verify_signature_rejects_every_issued_at_bit_flip() {
        let codec = codec();
        let token = codec.issue(SessionId::new(), t0());

        for bit in 0..64 {
            let mut forged = token.clone();
            forged.issued_at_millis ^= 1i64 << bit;
            assert!(!codec.verify_signature(&forged), "bit {bit} accepted");
        }
    }

    #[test]
    fn test_verify_signature_rejects_nonce_and_signature_bit_flips() {
        let codec = codec();
        let token = codec.issue(SessionId::new(), t0());

        for i in 0..token.nonce.len() {
            let mut forged = token.clone();
            forged.nonce = flip_char_bit(&token.nonce, i);
            assert!(!codec.verify_signature(&forged), "nonce char {i} accepted");
        }
        for i in 0..token.signature.len() {
            let mut forged = token.clone();
            forged.signature = flip_char_bit(&token.signature, i);
            assert!(!codec.verify_signature(&forged), "signature char {i} accepted");
        }
    }

    #[test]
    fn test_verify_signature_other_key_rejects() {
        let token = codec().issue(SessionId::new(), t0());
        assert!(!codec().verify_signature(&token));
    }

    #[test]
    fn test_verify_signature_ignores_expiry() {
        let codec = codec();
        let mut token = codec.issue(SessionId::new(), t0());
        token.expires_at = t0() - TimeDelta::hours(1);
        assert!(codec.verify_signature(&token));
    }

    // =====================================================================
    // encode() / decode()
    // =====================================================================

    #[test]
    fn test_encode_uses_camel_case_contract() {
        let codec = codec();
        let token = codec.issue(SessionId::new(), t0());
        let raw = codec.encode(&token).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(json["sessionId"], token.session_id.to_string());
        assert_eq!(json["issuedAtMillis"], token.issued_at_millis);
        assert_eq!(json["nonce"], token.nonce);
        assert_eq!(json["signature"], token.signature);
        assert!(json["expiresAt"].as_str().unwrap().starts_with("2025-10-16T08:02:00"));
    }

    #[test]
    fn test_decode_encoded_token_still_verifies() {
        let codec = codec();
        let token = codec.issue(SessionId::new(), t0());

        let decoded = codec.decode(&codec.encode(&token).unwrap()).unwrap();

        assert_eq!(decoded, token);
        assert!(codec.verify_signature(&decoded));
    }

    #[test]
    fn test_decode_rejects_non_json() {
        let result = codec().decode("https://example.com/not-a-token");
        assert!(matches!(result, Err(ProtocolError::MalformedToken(_))));
    }

    #[test]
    fn test_decode_rejects_missing_field() {
        let raw = r#"{"sessionId":"0d9c1f1e-5a41-4a8e-9f0e-0b6a7c4b9d21","issuedAtMillis":1}"#;
        let result = codec().decode(raw);
        assert!(matches!(result, Err(ProtocolError::MalformedToken(_))));
    }

    #[test]
    fn test_decode_rejects_wrong_field_type() {
        let codec = codec();
        let token = codec.issue(SessionId::new(), t0());
        let mut json = serde_json::to_value(&token).unwrap();
        json["issuedAtMillis"] = serde_json::Value::String("yesterday".into());

        let result = codec.decode(&json.to_string());
        assert!(matches!(result, Err(ProtocolError::MalformedToken(_))));
    }

    #[test]
    fn test_decode_rejects_short_nonce() {
        let codec = codec();
        let mut token = codec.issue(SessionId::new(), t0());
        token.nonce.truncate(8);

        let result = codec.decode(&codec.encode(&token).unwrap());
        assert!(matches!(result, Err(ProtocolError::MalformedToken(_))));
    }

    // =====================================================================
    // SigningKey
    // =====================================================================

    #[test]
    fn test_signing_key_from_hex_rejects_short_and_bad_input() {
        assert!(SigningKey::from_hex("abcd").is_err());
        assert!(SigningKey::from_hex("zz".repeat(16).as_str()).is_err());
        assert!(SigningKey::from_hex(&"ab".repeat(16)).is_ok());
    }

    #[test]
    fn test_signing_key_debug_is_redacted() {
        let key = SigningKey::from_hex(&"ab".repeat(32)).unwrap();
        let shown = format!("{key:?}");
        assert!(!shown.contains("abab"));
        assert!(shown.contains("redacted"));
    }

    #[test]
    fn test_same_key_verifies_across_codec_instances() {
        let key = SigningKey::from_hex(&"0f".repeat(32)).unwrap();
        let issuer = TokenCodec::new(&key).unwrap();
        let verifier = TokenCodec::new(&key).unwrap();

        let token = issuer.issue(SessionId::new(), t0());
        assert!(verifier.verify_signature(&token));
    }

    // =====================================================================
    // PresenceToken helpers
    // =====================================================================

    #[test]
    fn test_token_expiry_is_exclusive() {
        let token = codec().issue(SessionId::new(), t0());
        let expiry = t0() + TimeDelta::seconds(120);

        assert!(!token.is_expired_at(expiry - TimeDelta::milliseconds(1)));
        assert!(token.is_expired_at(expiry));
        assert_eq!(token.remaining_at(t0()), Duration::from_secs(120));
        assert_eq!(token.remaining_at(expiry + TimeDelta::seconds(5)), Duration::ZERO);
    }
}
