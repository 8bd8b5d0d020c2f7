//! # Core Protocol Components
//!
//! Low-level framing and field encoding.
//!
//! ## Components
//! - **Codec**: Tokio codec for length-prefixed frames over byte streams
//! - **Wire**: little-endian field writer and bounds-checked reader
//!
//! ## Wire Format
//! ```text
//! [Length(4, LE)] [Sealed payload(Length)]
//! ```
//!
//! ## Security
//! - Maximum frame size: 1 MiB (prevents memory exhaustion)
//! - Length validation before allocation

pub mod codec;
pub mod wire;
