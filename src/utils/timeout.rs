//! Timeout helpers for connection I/O.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default bound on a single send or an expected reply.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A connection that sends nothing for this long is closed.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// How long shutdown waits for open connections to finish.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `fut`, turning an elapsed deadline into [`ProtocolError::Timeout`].
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

/// Like [`with_timeout_error`] but reports an idle peer as
/// [`ProtocolError::ConnectionTimeout`].
pub async fn with_read_deadline<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| ProtocolError::ConnectionTimeout)?
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_maps_to_timeout() {
        let result: Result<()> = with_timeout_error(
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            },
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_read_maps_to_connection_timeout() {
        let result: Result<()> =
            with_read_deadline(std::future::pending(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ProtocolError::ConnectionTimeout)));
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let result: Result<()> =
            with_timeout_error(async { Err(ProtocolError::ConnectionClosed) }, DEFAULT_TIMEOUT)
                .await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }
}
