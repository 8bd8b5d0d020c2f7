//! # Utility Modules
//!
//! Supporting utilities for cryptography, rate limiting, logging, and timing.
//!
//! ## Components
//! - **Crypto**: frame ciphers (XChaCha20-Poly1305 and the legacy keystream)
//! - **Password**: PBKDF2-HMAC-SHA256 password hashes
//! - **Rate Limiter**: per-source fixed-window accept limits
//! - **Logging**: structured logging configuration
//! - **Timeout**: async timeout wrappers
//! - **Metrics**: thread-safe observability counters
//!
//! ## Security
//! - Cryptographically secure RNG (getrandom)
//! - Memory zeroing for key material (zeroize crate)

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod password;
pub mod rate_limiter;
pub mod timeout;

pub use metrics::Metrics;
pub use rate_limiter::RateLimiter;
