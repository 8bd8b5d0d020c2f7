//! # Frame Ciphers
//!
//! Every frame payload is sealed by a [`FrameCipher`] before it reaches the
//! codec, and opened by the peer's matching instance on the way in. Each
//! connection owns two instances: one for the bytes it sends and one for the
//! bytes it receives.
//!
//! ## Ciphers
//! - [`AeadCipher`]: XChaCha20-Poly1305 with an explicit sequence number in
//!   every nonce. Reordered or replayed frames fail to open.
//! - [`KeystreamCipher`]: the legacy XOR keystream. Both ends must call it the
//!   same number of times in the same order; a single lost or repeated frame
//!   desynchronises the connection for good.
//!
//! ## Sealed AEAD layout
//! ```text
//! [Nonce(24) = Prefix(16) || Sequence(8, LE)] [Ciphertext + Tag(16)]
//! ```

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::{ProtocolError, Result};

/// Size of the derived symmetric key.
pub const KEY_LEN: usize = 32;

/// Size of an XChaCha20 nonce.
pub const NONCE_LEN: usize = 24;

/// Size of the random part of the nonce.
pub const NONCE_PREFIX_LEN: usize = 16;

/// Size of the Poly1305 tag.
pub const TAG_LEN: usize = 16;

const KEYSTREAM_ROUNDS: usize = 4;
const GOLDEN_RATIO: u32 = 0x9E37_79B9;

/// Seals outgoing payloads or opens incoming ones for one direction of a connection.
pub trait FrameCipher: Send {
    fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>>;
    fn open(&mut self, sealed: &[u8]) -> Result<Vec<u8>>;
}

/// Which cipher both ends of every connection use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CipherKind {
    #[default]
    Aead,
    Keystream,
}

impl CipherKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CipherKind::Aead => "aead",
            CipherKind::Keystream => "keystream",
        }
    }
}

impl std::str::FromStr for CipherKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aead" | "xchacha20poly1305" => Ok(CipherKind::Aead),
            "keystream" | "legacy" => Ok(CipherKind::Keystream),
            other => Err(ProtocolError::ConfigError(format!(
                "Unknown cipher '{other}' (expected 'aead' or 'keystream')"
            ))),
        }
    }
}

/// Which end of the connection a cipher pair belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Direction labels used to derive distinct AEAD keys.
const CLIENT_TO_SERVER: &[u8] = b"realm/client-to-server";
const SERVER_TO_CLIENT: &[u8] = b"realm/server-to-client";

/// The pair of ciphers one end of a connection needs.
pub struct CipherPair {
    pub outbound: Box<dyn FrameCipher>,
    pub inbound: Box<dyn FrameCipher>,
}

/// Build the send and receive ciphers for `role` from the shared secret.
pub fn cipher_pair(kind: CipherKind, secret: &[u8], role: Role) -> Result<CipherPair> {
    let (send_label, recv_label) = match role {
        Role::Server => (SERVER_TO_CLIENT, CLIENT_TO_SERVER),
        Role::Client => (CLIENT_TO_SERVER, SERVER_TO_CLIENT),
    };

    let pair = match kind {
        CipherKind::Aead => {
            let mut send_key = derive_key(secret, send_label);
            let mut recv_key = derive_key(secret, recv_label);
            let pair = CipherPair {
                outbound: Box::new(AeadCipher::new(&send_key)?),
                inbound: Box::new(AeadCipher::new(&recv_key)?),
            };
            send_key.zeroize();
            recv_key.zeroize();
            pair
        }
        CipherKind::Keystream => CipherPair {
            outbound: Box::new(KeystreamCipher::new(secret)),
            inbound: Box::new(KeystreamCipher::new(secret)),
        },
    };
    Ok(pair)
}

/// Derive a 32-byte key from a secret and a domain-separation label.
pub fn derive_key(secret: &[u8], label: &[u8]) -> [u8; KEY_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(label);
    hasher.update((secret.len() as u64).to_le_bytes());
    hasher.update(secret);
    hasher.finalize().into()
}

/// Fill a buffer from the operating system's CSPRNG.
pub fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    getrandom::fill(&mut buf)
        .map_err(|e| ProtocolError::Custom(format!("Random source unavailable: {e}")))?;
    Ok(buf)
}

/// Compare two byte strings without an early exit on the first difference.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// XChaCha20-Poly1305 with a per-frame sequence number.
pub struct AeadCipher {
    cipher: XChaCha20Poly1305,
    prefix: [u8; NONCE_PREFIX_LEN],
    next_send: u64,
    last_received: Option<u64>,
}

impl AeadCipher {
    pub fn new(key: &[u8; KEY_LEN]) -> Result<Self> {
        Ok(Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key)),
            prefix: random_bytes()?,
            next_send: 0,
            last_received: None,
        })
    }
}

impl FrameCipher for AeadCipher {
    fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let sequence = self.next_send;
        self.next_send = self
            .next_send
            .checked_add(1)
            .ok_or(ProtocolError::EncryptionFailure)?;

        let mut nonce = [0u8; NONCE_LEN];
        nonce[..NONCE_PREFIX_LEN].copy_from_slice(&self.prefix);
        nonce[NONCE_PREFIX_LEN..].copy_from_slice(&sequence.to_le_bytes());

        let ciphertext = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| ProtocolError::EncryptionFailure)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend(ciphertext);
        nonce.zeroize();
        Ok(sealed)
    }

    fn open(&mut self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(ProtocolError::DecryptionFailure);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

        let mut seq_bytes = [0u8; 8];
        seq_bytes.copy_from_slice(&nonce[NONCE_PREFIX_LEN..]);
        let sequence = u64::from_le_bytes(seq_bytes);
        if let Some(last) = self.last_received {
            if sequence <= last {
                return Err(ProtocolError::ReplayDetected {
                    last,
                    received: sequence,
                });
            }
        }

        let plaintext = self
            .cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| ProtocolError::DecryptionFailure)?;

        // Only advance once the tag has verified
        self.last_received = Some(sequence);
        Ok(plaintext)
    }
}

/// Legacy XOR keystream keyed from the shared secret.
#[derive(Clone)]
pub struct KeystreamCipher {
    key: [u8; KEY_LEN],
    counter: u32,
}

impl KeystreamCipher {
    pub fn new(secret: &[u8]) -> Self {
        let mut key = [0u8; KEY_LEN];
        for (i, b) in secret.iter().enumerate() {
            key[i % KEY_LEN] ^= b;
        }
        for _ in 0..KEYSTREAM_ROUNDS {
            for i in 0..KEY_LEN {
                key[i] = key[i].rotate_left(3) ^ key[(i + 7) % KEY_LEN];
            }
        }
        Self { key, counter: 0 }
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// XOR `buf` with the keystream for the current counter, then advance it.
    /// Encrypting and decrypting are the same call.
    pub fn apply(&mut self, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            let mix = self.counter ^ (i as u32).wrapping_mul(GOLDEN_RATIO);
            *byte ^= self.key[i % KEY_LEN] ^ (mix & 0xFF) as u8;
        }
        self.counter = self.counter.wrapping_add(1);
    }
}

impl Drop for KeystreamCipher {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl FrameCipher for KeystreamCipher {
    fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut buf = plaintext.to_vec();
        self.apply(&mut buf);
        Ok(buf)
    }

    fn open(&mut self, sealed: &[u8]) -> Result<Vec<u8>> {
        let mut buf = sealed.to_vec();
        self.apply(&mut buf);
        Ok(buf)
    }
}
