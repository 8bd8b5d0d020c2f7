//! The five realm services and the pieces they share.
//!
//! Every service implements [`Service`]; [`crate::transport::tcp::serve`]
//! runs the accept loop and hands each connection's [`Session`] to
//! [`Service::handle`] on its own task.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::utils::metrics::Metrics;

pub mod character;
pub mod chat;
pub mod client;
pub mod game;
pub mod login;
pub mod quest;
pub mod session;

pub use client::Client;
pub use session::{Session, SessionState};

/// A realm service: per-connection handling plus optional background work.
pub trait Service: Send + Sync + 'static {
    /// Name used in logs and metrics.
    const NAME: &'static str;

    /// Drive one connection until it ends. The returned error decides how
    /// the accept loop logs the disconnect.
    fn handle(self: Arc<Self>, session: Session) -> impl Future<Output = Result<()>> + Send;

    fn metrics(&self) -> &Arc<Metrics>;

    /// Read deadline override; `None` uses the configured one.
    fn read_timeout(&self) -> Option<Duration> {
        None
    }

    /// Long-running tasks (tick loops, autosave) started with the listener.
    fn spawn_background(self: Arc<Self>, _shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        Vec::new()
    }

    /// Final work once connections have drained.
    fn on_shutdown(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}
