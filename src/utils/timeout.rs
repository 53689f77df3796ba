//! Timeout wrappers shared by every suspending transport operation.

use crate::error::{Result, TransportError};
use futures::FutureExt;
use std::future::Future;
use std::time::Duration;

/// Default timeout for connection attempts
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on graceful pool shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Run `fut` under `limit`.
///
/// A zero limit is a non-blocking attempt: the future is polled once and
/// `TimedOut` is returned if it is not already complete. A nonzero limit
/// maps expiry to `Io`/`TimedOut` tagged with `what`.
pub async fn with_deadline<T>(
    what: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    if limit.is_zero() {
        return match fut.now_or_never() {
            Some(result) => result,
            None => Err(TransportError::timed_out(what)),
        };
    }
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::timed_out(what)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[tokio::test]
    async fn zero_limit_polls_once() {
        let ready = with_deadline("ready", Duration::ZERO, async { Ok(1) }).await;
        assert_eq!(ready.unwrap(), 1);

        let pending = with_deadline("pending", Duration::ZERO, async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(2)
        })
        .await;
        match pending {
            Err(TransportError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn expiry_maps_to_timed_out() {
        let result: Result<()> = with_deadline("op", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;
        match result {
            Err(TransportError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
