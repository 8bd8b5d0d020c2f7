//! Message layer: typed messages, the validator that guards them, and the
//! handshake and token primitives the services authenticate with.

pub mod handshake;
pub mod message;
pub mod token;
pub mod validator;

pub use message::{Message, MessageType};
pub use validator::{validate, ValidationResult};
