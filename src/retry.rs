//! Shared exponential-delay-free retry primitive (§4.9), used directly by
//! the scheduler and available to middleware wrappers built on top of this
//! crate.
//!
//! Attempts are counted from 1; `retries = N` means up to `N + 1` total
//! invocations (§4.9, §8 property 7).

use std::future::Future;
use std::time::Duration;

/// Run `f` until it succeeds or `retries` extra attempts have been used,
/// returning the last error once attempts are exhausted.
pub async fn try_retry_with_backoff<T, E, F, Fut>(
    retries: u32,
    delay: Duration,
    mut f: F,
) -> (Result<T, E>, u32)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match f(attempt).await {
            Ok(value) => return (Ok(value), attempt),
            Err(e) => {
                if attempt > retries {
                    return (Err(e), attempt);
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_when_first_attempt_works() {
        let calls = AtomicU32::new(0);
        let (value, attempts) = try_retry_with_backoff::<_, &str, _, _>(
            3,
            Duration::from_millis(0),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(42) }
            },
        )
        .await;
        assert_eq!(value.unwrap(), 42);
        assert_eq!(attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_up_to_the_bound_then_gives_up() {
        let calls = AtomicU32::new(0);
        let (result, attempts) = try_retry_with_backoff(2, Duration::from_millis(0), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), &str>("boom") }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts, 3); // 1 + retries(2)
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn succeeds_on_a_later_attempt() {
        let calls = AtomicU32::new(0);
        let (value, attempts) = try_retry_with_backoff(3, Duration::from_millis(0), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err("not yet")
                } else {
                    Ok("success")
                }
            }
        })
        .await;
        assert_eq!(value.unwrap(), "success");
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
