//! # TCP Accept Loop
//!
//! Binds a service's port and runs one task per accepted connection.
//!
//! ## Accept path
//! 1. rate limiter, keyed by the peer's IP; refused peers are closed before
//!    any handshake
//! 2. connection ceiling (`max_connections`)
//! 3. a [`Session`] with fresh server-side ciphers, handed to
//!    [`Service::handle`] on its own task
//!
//! ## Shutdown
//! When the watch channel flips to `true` the loop stops accepting, open
//! sessions see the signal on their next read, and the loop waits (bounded by
//! `shutdown_timeout`) for the active count to reach zero before running the
//! service's final save.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::RealmConfig;
use crate::error::{ProtocolError, Result};
use crate::service::session::{Session, SessionSettings};
use crate::service::Service;
use crate::utils::crypto::{cipher_pair, Role};
use crate::utils::rate_limiter::RateLimiter;
use crate::utils::timeout::DEFAULT_TIMEOUT;

/// Decrements the active-connection count when the connection task ends,
/// however it ends.
struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bind a listener, mapping failure to a startup error.
pub async fn bind(address: &str) -> Result<TcpListener> {
    TcpListener::bind(address).await.map_err(|e| {
        error!(address, error = %e, "Failed to bind");
        ProtocolError::Io(e)
    })
}

/// Run `service` on `listener` until `shutdown` flips to `true`.
#[instrument(skip_all, fields(service = S::NAME))]
pub async fn serve<S: Service>(
    listener: TcpListener,
    service: Arc<S>,
    config: Arc<RealmConfig>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let local = listener.local_addr()?;
    info!(address = %local, "Listening");

    let metrics = service.metrics().clone();
    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
    let mut background = vec![limiter
        .clone()
        .spawn_sweeper(config.rate_limit.sweep_interval, shutdown.clone())];
    background.extend(service.clone().spawn_background(shutdown.clone()));

    let settings = SessionSettings {
        read_timeout: service.read_timeout().unwrap_or(config.server.read_timeout),
        send_timeout: DEFAULT_TIMEOUT,
    };
    let active = Arc::new(AtomicUsize::new(0));
    let next_session_id = AtomicU32::new(1);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                        continue;
                    }
                };

                if !limiter.allow(peer.ip()).await {
                    metrics.rate_limited();
                    debug!(peer = %peer, "Rate limited, closing");
                    continue;
                }
                if active.load(Ordering::Acquire) >= config.server.max_connections {
                    metrics.rejected_full();
                    warn!(peer = %peer, "Connection limit reached, closing");
                    continue;
                }

                let id = next_session_id.fetch_add(1, Ordering::Relaxed);
                match open_session(id, peer, stream, &config, settings, &service, shutdown.clone()) {
                    Ok(session) => {
                        active.fetch_add(1, Ordering::AcqRel);
                        metrics.connection_established();
                        let guard = ConnectionGuard(active.clone());
                        let service = service.clone();
                        tokio::spawn(async move {
                            let _guard = guard;
                            let metrics = service.metrics().clone();
                            let result = service.handle(session).await;
                            log_disconnect::<S>(id, peer, &result);
                            match &result {
                                Err(e) if e.is_protocol_violation() => metrics.protocol_error(),
                                Err(e) if e.is_transport() && !matches!(e, ProtocolError::ConnectionClosed) => {
                                    metrics.connection_error()
                                }
                                _ => {}
                            }
                            metrics.connection_closed();
                        });
                    }
                    Err(e) => error!(peer = %peer, error = %e, "Failed to set up session"),
                }
            }
        }
    }

    drop(listener);
    info!("Shutting down. Waiting for connections to close...");
    wait_for_drain(&active, config.server.shutdown_timeout).await;

    for task in background {
        if tokio::time::timeout(Duration::from_secs(1), task).await.is_err() {
            warn!("Background task did not stop in time");
        }
    }

    let result = service.on_shutdown().await;
    if let Err(e) = &result {
        error!(error = %e, "Final save failed");
    }
    metrics.log_metrics(S::NAME);
    info!("Stopped");
    result
}

fn open_session<S: Service>(
    id: u32,
    peer: SocketAddr,
    stream: TcpStream,
    config: &RealmConfig,
    settings: SessionSettings,
    service: &Arc<S>,
    shutdown: watch::Receiver<bool>,
) -> Result<Session> {
    stream.set_nodelay(true)?;
    let ciphers = cipher_pair(
        config.security.cipher,
        config.security.shared_secret.as_bytes(),
        Role::Server,
    )?;
    debug!(session = id, peer = %peer, "Connection accepted");
    Ok(Session::new(
        id,
        peer,
        stream,
        ciphers,
        settings,
        service.metrics().clone(),
        shutdown,
    ))
}

fn log_disconnect<S: Service>(id: u32, peer: SocketAddr, result: &Result<()>) {
    match result {
        Ok(()) | Err(ProtocolError::ConnectionClosed) => {
            debug!(service = S::NAME, session = id, peer = %peer, "Connection closed")
        }
        Err(e) if e.is_transport() => {
            debug!(service = S::NAME, session = id, peer = %peer, error = %e, "Connection dropped")
        }
        Err(e) if e.is_protocol_violation() => {
            warn!(service = S::NAME, session = id, peer = %peer, error = %e, "Protocol violation, connection dropped")
        }
        Err(e) => {
            error!(service = S::NAME, session = id, peer = %peer, error = %e, "Connection failed")
        }
    }
}

async fn wait_for_drain(active: &AtomicUsize, limit: Duration) {
    let deadline = tokio::time::sleep(limit);
    tokio::pin!(deadline);

    loop {
        let connections = active.load(Ordering::Acquire);
        if connections == 0 {
            info!("All connections closed");
            return;
        }
        tokio::select! {
            _ = &mut deadline => {
                warn!(connections, "Shutdown timeout reached, forcing exit");
                return;
            }
            _ = tokio::time::sleep(Duration::from_millis(50)) => {
                debug!(connections, "Waiting for connections to close");
            }
        }
    }
}

/// A service running on its own task, stoppable from the outside.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal shutdown and wait for the final save.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| ProtocolError::Custom(format!("Server task failed: {e}")))?
    }
}

/// Bind `address` and serve `service` on a spawned task.
pub async fn spawn<S: Service>(
    address: &str,
    service: Arc<S>,
    config: Arc<RealmConfig>,
) -> Result<ServerHandle> {
    let listener = bind(address).await?;
    let local_addr = listener.local_addr()?;
    let (shutdown, rx) = watch::channel(false);
    let task = tokio::spawn(serve(listener, service, config, rx));
    Ok(ServerHandle {
        local_addr,
        shutdown,
        task,
    })
}
