//! PBKDF2-HMAC-SHA256 password hashes.
//!
//! Stored form: `iterations.salt_hex.hash_hex`, with a 16-byte salt and a
//! 32-byte hash. Verification re-derives the hash with the stored salt and
//! iteration count, then compares in constant time.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::Result;
use crate::utils::crypto::{constant_time_eq, random_bytes};

pub const DEFAULT_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

/// Hashes and verifies account passwords.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    iterations: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_ITERATIONS)
    }
}

impl PasswordHasher {
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(1),
        }
    }

    pub fn hash(&self, password: &str) -> Result<String> {
        let salt: [u8; SALT_LEN] = random_bytes()?;
        let mut digest = derive(password.as_bytes(), &salt, self.iterations);
        let stored = format!(
            "{}.{}.{}",
            self.iterations,
            hex::encode(salt),
            hex::encode(digest)
        );
        digest.zeroize();
        Ok(stored)
    }

    /// False for a wrong password and for any malformed stored hash.
    pub fn verify(&self, password: &str, stored: &str) -> bool {
        let mut parts = stored.splitn(3, '.');
        let (Some(iterations), Some(salt), Some(expected)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return false;
        };
        let (Ok(iterations), Ok(salt), Ok(expected)) = (
            iterations.parse::<u32>(),
            hex::decode(salt),
            hex::decode(expected),
        ) else {
            return false;
        };
        if iterations == 0 || expected.len() != HASH_LEN {
            return false;
        }
        let mut digest = derive(password.as_bytes(), &salt, iterations);
        let matches = constant_time_eq(&digest, &expected);
        digest.zeroize();
        matches
    }
}

fn derive(password: &[u8], salt: &[u8], iterations: u32) -> [u8; HASH_LEN] {
    let mut out = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_then_verify() {
        let hasher = PasswordHasher::new(50);
        let stored = hasher.hash("test123").unwrap();
        assert!(stored.starts_with("50."));
        assert!(hasher.verify("test123", &stored));
        assert!(!hasher.verify("test124", &stored));
    }

    #[test]
    fn test_known_pbkdf2_vectors() {
        // PBKDF2-HMAC-SHA256, P = "password", S = "salt", dkLen = 32
        assert_eq!(
            hex::encode(derive(b"password", b"salt", 1)),
            "120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b"
        );
        assert_eq!(
            hex::encode(derive(b"password", b"salt", 4096)),
            "c5e478d59288c841aa530db6845c4c8d962893a001ce4e11a4963873aa98134a"
        );
    }

    #[test]
    fn test_verifies_externally_produced_hash() {
        // "salt" in hex, one round
        let stored = "1.73616c74.120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b";
        assert!(PasswordHasher::default().verify("password", stored));
        assert!(!PasswordHasher::default().verify("Password", stored));
    }

    #[test]
    fn test_salts_differ() {
        let hasher = PasswordHasher::new(10);
        assert_ne!(hasher.hash("same").unwrap(), hasher.hash("same").unwrap());
    }

    #[test]
    fn test_malformed_stored_hash() {
        let hasher = PasswordHasher::new(10);
        for bad in ["", "10", "10.zz.00", "x.00.00", "0.00.00", "10.00.abc", "10.00.00"] {
            assert!(!hasher.verify("pw", bad), "{bad}");
        }
    }

    #[test]
    fn test_verify_uses_stored_iterations() {
        let stored = PasswordHasher::new(20).hash("pw").unwrap();
        assert!(PasswordHasher::new(99).verify("pw", &stored));
    }
}
