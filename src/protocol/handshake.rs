//! Connection-opening steps that happen before any typed message.
//!
//! The Login service greets every accepted connection with an unsolicited
//! 32-byte random challenge, sealed like any other frame. The client opens it
//! and discards it; its only job is to put both ends' ciphers through the same
//! first call, which keeps the legacy keystream counters aligned from the
//! start.
//!
//! Game servers prove themselves to the Character service with the shared
//! service key, compared here without early exit.

use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::error::{constants, ProtocolError, Result};
use crate::utils::crypto::{constant_time_eq, random_bytes};

/// Size of the Login greeting challenge.
pub const CHALLENGE_LEN: usize = 32;

/// Current Unix time in seconds.
///
/// # Errors
/// Returns a `ProtocolError::Custom` if the system time is earlier than UNIX_EPOCH
pub fn current_timestamp() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .map_err(|_| ProtocolError::Custom(constants::ERR_SYSTEM_TIME.into()))
}

/// Fresh random greeting for a new Login connection.
#[instrument(level = "debug")]
pub fn new_challenge() -> Result<[u8; CHALLENGE_LEN]> {
    let challenge = random_bytes::<CHALLENGE_LEN>()?;
    debug!("Generated login challenge");
    Ok(challenge)
}

/// Client-side check of the opened greeting frame.
pub fn check_challenge(payload: &[u8]) -> Result<()> {
    if payload.len() == CHALLENGE_LEN {
        Ok(())
    } else {
        Err(ProtocolError::HandshakeError(format!(
            "expected {CHALLENGE_LEN}-byte challenge, got {} bytes",
            payload.len()
        )))
    }
}

fn digest(value: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hasher.finalize().into()
}

/// Compare a presented service key against the configured one.
pub fn verify_service_key(presented: &str, expected: &str) -> bool {
    // Hashing first keeps the comparison length-independent
    constant_time_eq(&digest(presented), &digest(expected))
}
