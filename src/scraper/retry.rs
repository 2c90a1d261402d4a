use rand::RngExt;
use std::future::Future;
use std::time::Duration;
use tokio_retry::{Retry, RetryIf};

/// Bounded retry with a jittered, linearly-increasing delay between attempts.
///
/// The schedule grows with the attempt number (base, 2×base, 3×base, …) and
/// each delay carries up to `jitter` of random slack so concurrent units
/// never retry in lockstep against the remote site.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration, jitter: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            jitter,
        }
    }

    /// An n-attempt policy sleeps n-1 times.
    fn delays(&self) -> Vec<Duration> {
        let jitter_ms = self.jitter.as_millis() as u64;
        (1..self.max_attempts.max(1) as u32)
            .map(|attempt| {
                let slack = if jitter_ms == 0 {
                    0
                } else {
                    rand::rng().random_range(0..=jitter_ms)
                };
                self.base_delay * attempt + Duration::from_millis(slack)
            })
            .collect()
    }

    /// Run `action` until it succeeds or the schedule is exhausted, treating
    /// every error as retryable. The last error is returned as-is.
    pub async fn run<A, F, T, E>(&self, action: A) -> Result<T, E>
    where
        A: FnMut() -> F,
        F: Future<Output = Result<T, E>>,
    {
        Retry::spawn(self.delays(), action).await
    }

    /// Like [`run`](Self::run), but stops early when `retryable` rejects the
    /// error (e.g. an HTTP 404 that no amount of retrying will fix).
    pub async fn run_if<A, F, T, E, C>(&self, action: A, retryable: C) -> Result<T, E>
    where
        A: FnMut() -> F,
        F: Future<Output = Result<T, E>>,
        C: FnMut(&E) -> bool,
    {
        RetryIf::spawn(self.delays(), action, retryable).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick(max_attempts: usize) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::ZERO)
    }

    #[test]
    fn schedule_grows_linearly() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100), Duration::ZERO);
        assert_eq!(
            policy.delays(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(300),
            ]
        );
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_millis(50));
        for (i, delay) in policy.delays().into_iter().enumerate() {
            let base = Duration::from_millis(100 * (i as u64 + 1));
            assert!(delay >= base);
            assert!(delay <= base + Duration::from_millis(50));
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicUsize::new(0);
        let result: Result<u32, &str> = quick(5)
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { if n < 3 { Err("transient") } else { Ok(42) } }
            })
            .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<u32, &str> = quick(3)
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("down") }
            })
            .await;
        assert_eq!(result, Err("down"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_errors_stop_immediately() {
        let calls = AtomicUsize::new(0);
        let result: Result<u32, u16> = quick(5)
            .run_if(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(404) }
                },
                |status: &u16| *status != 404,
            )
            .await;
        assert_eq!(result, Err(404));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
