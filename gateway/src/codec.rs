//! Column-level codec for partner secrets.
//!
//! Secrets are encoded before they reach the repository and decoded when
//! records are turned into cached partners, so the rest of the gateway only
//! ever sees plaintext `api_key` values.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Codec applied to the `api_key` column.
///
/// Currently a base64 passthrough; the key is accepted so that swapping in
/// real encryption is a local change here. TODO: replace with AES-GCM once
/// key rotation for partner secrets is settled.
#[derive(Clone)]
pub struct SecretCodec {
    _key: String,
}

impl SecretCodec {
    pub fn new(key: impl Into<String>) -> Self {
        SecretCodec { _key: key.into() }
    }

    pub fn encode(&self, plaintext: &str) -> String {
        STANDARD.encode(plaintext.as_bytes())
    }

    /// Returns `None` when the stored value is not decodable; callers treat
    /// such records as unusable rather than failing the whole load.
    pub fn decode(&self, stored: &str) -> Option<String> {
        let bytes = STANDARD.decode(stored.as_bytes()).ok()?;
        String::from_utf8(bytes).ok()
    }
}
