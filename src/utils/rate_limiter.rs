//! # Rate Limiter
//!
//! Per-source fixed-window request counter, consulted by the accept loop
//! before a connection gets a session or any handshake work.
//!
//! ## Rules
//! - first request from a source: create an entry with count 1, allow
//! - window expired (`now - window_start >= window`): reset to count 1, allow
//! - otherwise allow iff `count < max_requests`, counting only allowed requests
//!
//! Windows are reset, never accumulated. [`RateLimiter::sweep`] drops entries
//! whose window started more than two windows ago.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy)]
struct ClientInfo {
    request_count: u32,
    window_start: Instant,
}

/// Thread-safe fixed-window limiter keyed by source address.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    clients: Mutex<HashMap<IpAddr, ClientInfo>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, config.window)
    }

    /// Record a request from `source` and report whether it may proceed.
    pub async fn allow(&self, source: IpAddr) -> bool {
        let now = Instant::now();
        let mut clients = self.clients.lock().await;

        let info = match clients.get_mut(&source) {
            None => {
                clients.insert(
                    source,
                    ClientInfo {
                        request_count: 1,
                        window_start: now,
                    },
                );
                return true;
            }
            Some(info) => info,
        };

        if now.duration_since(info.window_start) >= self.window {
            info.request_count = 1;
            info.window_start = now;
            return true;
        }

        if info.request_count < self.max_requests {
            info.request_count += 1;
            true
        } else {
            trace!(%source, count = info.request_count, "Request over limit");
            false
        }
    }

    /// Remove entries idle for more than twice the window. Returns how many went.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let stale_after = self.window * 2;
        let mut clients = self.clients.lock().await;
        let before = clients.len();
        clients.retain(|_, info| now.duration_since(info.window_start) <= stale_after);
        before - clients.len()
    }

    /// Number of tracked sources.
    pub async fn tracked(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Run [`sweep`](Self::sweep) every `interval` until shutdown is signalled.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = self.sweep().await;
                        if removed > 0 {
                            debug!(removed, "Swept idle rate-limit entries");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const A: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const B: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

    #[tokio::test(start_paused = true)]
    async fn test_exactly_n_allowed_per_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(limiter.allow(A).await);
        }
        assert!(!limiter.allow(A).await);
        assert!(!limiter.allow(A).await);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(limiter.allow(A).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sources_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.allow(A).await);
        assert!(!limiter.allow(A).await);
        assert!(limiter.allow(B).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_instead_of_accumulating() {
        let limiter = RateLimiter::new(2, Duration::from_secs(10));
        assert!(limiter.allow(A).await);
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(limiter.allow(A).await);
        assert!(limiter.allow(A).await);
        assert!(!limiter.allow(A).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_only_stale_entries() {
        let limiter = RateLimiter::new(5, Duration::from_secs(10));
        limiter.allow(A).await;
        tokio::time::advance(Duration::from_secs(15)).await;
        limiter.allow(B).await;
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(limiter.sweep().await, 1);
        assert_eq!(limiter.tracked().await, 1);
    }
}
