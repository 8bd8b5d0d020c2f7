//! # Session Tokens
//!
//! The credential Login hands out and the other services accept. A token is
//! self-verifying: any service configured with the same shared secret can
//! check it without asking Login, so the services stay independent processes.
//!
//! ## Format
//! ```text
//! hex( Nonce(24) || XChaCha20-Poly1305( Expiry(8, LE) || Entropy(16) || Username ) )
//! ```
//!
//! A token is rejected when it is not hex, when its tag fails (forged, altered,
//! or sealed under another secret), or when its expiry has passed.

use std::time::Duration;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use zeroize::Zeroize;

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handshake::current_timestamp;
use crate::utils::crypto::{derive_key, random_bytes, NONCE_LEN, TAG_LEN};

const TOKEN_LABEL: &[u8] = b"realm/session-token";
const ENTROPY_LEN: usize = 16;
const HEADER_LEN: usize = 8 + ENTROPY_LEN;

/// Minimum length of an issued token in characters.
pub const MIN_TOKEN_LEN: usize = 2 * (NONCE_LEN + HEADER_LEN + TAG_LEN);

/// Issues and verifies session tokens under one shared secret.
pub struct TokenAuthority {
    cipher: XChaCha20Poly1305,
    ttl: Duration,
}

impl TokenAuthority {
    pub fn new(shared_secret: &[u8], ttl: Duration) -> Self {
        let mut key = derive_key(shared_secret, TOKEN_LABEL);
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
        key.zeroize();
        Self { cipher, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for `username`, valid for the configured TTL.
    pub fn issue(&self, username: &str) -> Result<String> {
        self.issue_at(username, current_timestamp()?)
    }

    /// Return the username a token was issued to.
    pub fn verify(&self, token: &str) -> Result<String> {
        self.verify_at(token, current_timestamp()?)
    }

    pub(crate) fn issue_at(&self, username: &str, now: u64) -> Result<String> {
        let expiry = now.saturating_add(self.ttl.as_secs());
        let entropy: [u8; ENTROPY_LEN] = random_bytes()?;
        let nonce: [u8; NONCE_LEN] = random_bytes()?;

        let mut plaintext = Vec::with_capacity(HEADER_LEN + username.len());
        plaintext.extend_from_slice(&expiry.to_le_bytes());
        plaintext.extend_from_slice(&entropy);
        plaintext.extend_from_slice(username.as_bytes());

        let ciphertext = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| ProtocolError::EncryptionFailure)?;
        plaintext.zeroize();

        let mut raw = nonce.to_vec();
        raw.extend(ciphertext);
        Ok(hex::encode(raw))
    }

    pub(crate) fn verify_at(&self, token: &str, now: u64) -> Result<String> {
        let invalid = || ProtocolError::AuthenticationFailed(constants::ERR_INVALID_TOKEN);

        let raw = hex::decode(token).map_err(|_| invalid())?;
        if raw.len() < NONCE_LEN + HEADER_LEN + TAG_LEN {
            return Err(invalid());
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let mut plaintext = self
            .cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| invalid())?;

        let mut expiry = [0u8; 8];
        expiry.copy_from_slice(&plaintext[..8]);
        if now > u64::from_le_bytes(expiry) {
            plaintext.zeroize();
            return Err(ProtocolError::AuthenticationFailed(
                constants::ERR_TOKEN_EXPIRED,
            ));
        }

        let username = std::str::from_utf8(&plaintext[HEADER_LEN..])
            .map(str::to_owned)
            .map_err(|_| invalid());
        plaintext.zeroize();
        username
    }
}
