use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::UpstreamError;

const BASE_DELAY_MS: u64 = 500;
const FACTOR: u64 = 2;
const MAX_ATTEMPTS: u32 = 8;
const JITTER: f64 = 0.2;

/// Retries `op` with exponential backoff (base 500ms, factor 2, up to 8
/// attempts, ±20% jitter) as long as it fails with
/// [`UpstreamError::is_transient`]. Any other error tag fails fast.
pub async fn with_retry<T, F, Fut>(mut op: F) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                let delay = backoff_delay(attempt);
                tracing::warn!(attempt, ?delay, error = %e, "retrying transient upstream failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = BASE_DELAY_MS * FACTOR.pow(attempt);
    let jitter_range = (base as f64 * JITTER) as i64;
    let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
    let millis = (base as i64 + jitter).max(0) as u64;
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, UpstreamError> = with_retry(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, UpstreamError> = with_retry(|| async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(UpstreamError::Transient("boom".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fails_fast_on_permanent() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, UpstreamError> = with_retry(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(UpstreamError::Permanent("nope".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
