//! # Authenticated-Session Table
//!
//! Login's record of the tokens it has issued and not yet seen revoked.
//! Tokens verify on their own (see [`crate::protocol::token`]); this table is
//! what lets Login answer "is this session still live" and forget a token on
//! logout.
//!
//! ## Features
//! - **TTL-based expiration**: entries expire with the token they describe
//! - **Memory-bounded**: the oldest entry is evicted once `max_entries` is reached
//! - **Revocation**: `Disconnect` removes the session's token
//!
//! ## Usage
//! ```
//! # tokio_test_block_on(async {
//! use realm_net::transport::session_cache::SessionCache;
//! use std::time::Duration;
//!
//! let cache = SessionCache::new(1000, Duration::from_secs(3600));
//! cache.store("a1b2c3", "test").await;
//! assert_eq!(cache.get("a1b2c3").await.as_deref(), Some("test"));
//! assert!(cache.revoke("a1b2c3").await);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Clone, Debug)]
struct SessionEntry {
    username: String,
    created_at: Instant,
}

/// Thread-safe token → username table with expiry.
#[derive(Clone)]
pub struct SessionCache {
    max_entries: usize,
    ttl: Duration,
    inner: Arc<Mutex<SessionCacheInner>>,
}

struct SessionCacheInner {
    sessions: HashMap<String, SessionEntry>,
    total_inserts: u64,
}

impl SessionCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            max_entries: max_entries.max(1),
            ttl,
            inner: Arc::new(Mutex::new(SessionCacheInner {
                sessions: HashMap::new(),
                total_inserts: 0,
            })),
        }
    }

    fn is_expired(&self, entry: &SessionEntry, now: Instant) -> bool {
        now.duration_since(entry.created_at) > self.ttl
    }

    /// Register a freshly issued token.
    pub async fn store(&self, token: impl Into<String>, username: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        self.evict_expired(&mut inner, now);

        inner.sessions.insert(
            token.into(),
            SessionEntry {
                username: username.into(),
                created_at: now,
            },
        );
        inner.total_inserts += 1;

        if inner.sessions.len() > self.max_entries {
            Self::evict_oldest(&mut inner);
        }

        trace!(session_count = inner.sessions.len(), "Session token stored");
    }

    /// Username for a live token, `None` if unknown, revoked or expired.
    pub async fn get(&self, token: &str) -> Option<String> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        if let Some(entry) = inner.sessions.get(token) {
            if !self.is_expired(entry, now) {
                return Some(entry.username.clone());
            }
        }

        inner.sessions.remove(token);
        None
    }

    /// Forget a token. Returns whether it was present.
    pub async fn revoke(&self, token: &str) -> bool {
        let removed = self.inner.lock().await.sessions.remove(token).is_some();
        if removed {
            debug!("Session token revoked");
        }
        removed
    }

    pub async fn stats(&self) -> SessionCacheStats {
        let inner = self.inner.lock().await;
        let now = Instant::now();

        SessionCacheStats {
            total_entries: inner.sessions.len(),
            max_entries: self.max_entries,
            expired_count: inner
                .sessions
                .values()
                .filter(|e| self.is_expired(e, now))
                .count(),
            total_inserts: inner.total_inserts,
        }
    }

    fn evict_expired(&self, inner: &mut SessionCacheInner, now: Instant) {
        let before = inner.sessions.len();
        inner
            .sessions
            .retain(|_, entry| now.duration_since(entry.created_at) <= self.ttl);
        let after = inner.sessions.len();

        if before != after {
            debug!(
                removed_count = before - after,
                remaining_count = after,
                "Expired session tokens evicted"
            );
        }
    }

    fn evict_oldest(inner: &mut SessionCacheInner) {
        if let Some(oldest) = inner
            .sessions
            .iter()
            .min_by_key(|(_, entry)| entry.created_at)
            .map(|(k, _)| k.clone())
        {
            inner.sessions.remove(&oldest);
            debug!("Oldest session token evicted to make room");
        }
    }
}

/// Statistics about the session table
#[derive(Debug, Clone, Copy)]
pub struct SessionCacheStats {
    pub total_entries: usize,
    pub max_entries: usize,
    /// Expired but not yet evicted
    pub expired_count: usize,
    pub total_inserts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_revoke() {
        let cache = SessionCache::new(10, Duration::from_secs(60));

        cache.store("tok-1", "test").await;
        assert_eq!(cache.get("tok-1").await.as_deref(), Some("test"));

        assert!(cache.revoke("tok-1").await);
        assert!(!cache.revoke("tok-1").await);
        assert!(cache.get("tok-1").await.is_none());
    }

    #[tokio::test]
    async fn test_missing_token() {
        let cache = SessionCache::new(10, Duration::from_secs(60));
        assert!(cache.get("nonexistent").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let cache = SessionCache::new(10, Duration::from_secs(60));
        cache.store("tok-1", "test").await;

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cache.get("tok-1").await.is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.stats().await.expired_count, 1);
        assert!(cache.get("tok-1").await.is_none());
        assert_eq!(cache.stats().await.total_entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_eviction() {
        let cache = SessionCache::new(3, Duration::from_secs(60));

        for i in 0..5 {
            cache.store(format!("tok-{i}"), "user").await;
            tokio::time::advance(Duration::from_millis(10)).await;
        }

        let stats = cache.stats().await;
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.total_inserts, 5);
        assert!(cache.get("tok-0").await.is_none());
        assert!(cache.get("tok-4").await.is_some());
    }
}
