//! Anonymous per-browser user identity.
//!
//! A user id is a random UUID sealed with AES-256-GCM under a key derived
//! from a configured passphrase. The sealed form travels in the `user`
//! cookie as `hex(ciphertext || nonce)`; whoever presents a token that opens
//! under the key is that user. Nothing is stored server-side.

mod middleware;

pub use middleware::{identify_user, UserId};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Name of the cookie carrying the sealed user id.
pub const COOKIE_NAME: &str = "user";

/// AES-GCM nonce size (96 bits).
const NONCE_SIZE: usize = 12;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid identity key: {0}")]
    InvalidKey(String),
    #[error("failed to seal user id: {0}")]
    Seal(String),
}

/// Outcome of resolving the identity of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub user_id: String,
    /// Set when a new identity was minted and must be sent back as a cookie.
    pub issued_token: Option<String>,
}

#[derive(Clone)]
pub struct IdentityCodec {
    cipher: Aes256Gcm,
}

impl IdentityCodec {
    /// Derive the cipher key as SHA-256 of `secret`.
    pub fn new(secret: &str) -> Result<Self, IdentityError> {
        let key = Sha256::digest(secret.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(key.as_slice())
            .map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Open a token. Any failure (bad hex, truncated, forged, wrong key)
    /// yields `None`.
    pub fn decode(&self, token: &str) -> Option<String> {
        let sealed = hex::decode(token).ok()?;
        if sealed.len() <= NONCE_SIZE {
            return None;
        }

        let (ciphertext, nonce) = sealed.split_at(sealed.len() - NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .ok()?;

        String::from_utf8(plaintext).ok()
    }

    /// Seal `user_id` under a fresh random nonce.
    pub fn seal(&self, user_id: &str) -> Result<String, IdentityError> {
        let nonce_bytes: [u8; NONCE_SIZE] = rand::random();
        let mut sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), user_id.as_bytes())
            .map_err(|e| IdentityError::Seal(e.to_string()))?;
        sealed.extend_from_slice(&nonce_bytes);

        Ok(hex::encode(sealed))
    }

    /// Mint a new user id and its token.
    pub fn issue(&self) -> Result<(String, String), IdentityError> {
        let user_id = uuid::Uuid::new_v4().to_string();
        let token = self.seal(&user_id)?;
        Ok((user_id, token))
    }

    /// Use the identity in `token` when it opens, otherwise mint a new one.
    pub fn resolve(&self, token: Option<&str>) -> Result<ResolvedIdentity, IdentityError> {
        if let Some(user_id) = token.and_then(|t| self.decode(t)) {
            return Ok(ResolvedIdentity {
                user_id,
                issued_token: None,
            });
        }

        if token.is_some() {
            tracing::debug!("rejected user token, issuing a new identity");
        }

        let (user_id, token) = self.issue()?;
        Ok(ResolvedIdentity {
            user_id,
            issued_token: Some(token),
        })
    }
}
