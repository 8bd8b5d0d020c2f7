//! Network transport: the TCP accept loop and Login's session-token table.

pub mod session_cache;
pub mod tcp;

pub use session_cache::SessionCache;
pub use tcp::{serve, spawn, ServerHandle};
