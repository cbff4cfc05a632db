//! Restarts the inbound polling loop after transient failures.
//!
//! Retry decisions rely on [`TransportErrorKind::is_retryable`]; an error the
//! platform will keep returning (a revoked token, for one) stops the process
//! instead of looping forever.
//!
//! [`TransportErrorKind::is_retryable`]: crate::transport::TransportErrorKind::is_retryable

use crate::config::Settings;
use crate::transport::TransportError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Pause after a full series of failed attempts
pub const POLL_COOLDOWN_SECS: u64 = 600;

const STOP_RETRY_MILLIS: u64 = 100;

/// Backoff schedule of the supervised loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts before the cooldown
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial: Duration,
    /// Delay ceiling
    pub max: Duration,
    /// Pause once `max_attempts` is reached; the count then starts over
    pub cooldown: Duration,
}

impl RetryPolicy {
    /// Policy configured through `POLL_*` settings
    #[must_use]
    pub const fn from_settings(settings: &Settings) -> Self {
        Self {
            max_attempts: settings.poll_max_retries,
            initial: Duration::from_secs(settings.poll_initial_backoff_secs),
            max: Duration::from_secs(settings.poll_max_backoff_secs),
            cooldown: Duration::from_secs(POLL_COOLDOWN_SECS),
        }
    }

    /// Delay before retry number `attempt` (1-based): doubles up to `max`,
    /// and is the cooldown once the attempts are used up
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt >= self.max_attempts {
            return self.cooldown;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Runs `run` until it returns `Ok`, the token is cancelled, or it fails
/// with a non-retryable error.
///
/// # Errors
///
/// Returns the first non-retryable error.
pub async fn run_supervised<F, Fut>(
    policy: RetryPolicy,
    token: CancellationToken,
    mut run: F,
) -> Result<(), TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), TransportError>>,
{
    let mut attempt = 0u32;
    loop {
        match run().await {
            Ok(()) => {
                info!("Polling loop finished");
                return Ok(());
            }
            Err(e) if !e.kind().is_retryable() => {
                error!(error = %e, "Polling loop failed permanently");
                return Err(e);
            }
            Err(e) => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                if attempt >= policy.max_attempts {
                    warn!(error = %e, attempts = attempt, cooldown_secs = delay.as_secs(), "Retries exhausted, cooling down");
                    attempt = 0;
                } else {
                    warn!(error = %e, attempt, delay_secs = delay.as_secs(), "Polling loop failed, retrying");
                }
                tokio::select! {
                    () = token.cancelled() => return Ok(()),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// Waits for `token`, then stops a running service through `stop`.
///
/// `stop` returns `None` while the service cannot be stopped yet (it has not
/// started); it is asked again every `STOP_RETRY_MILLIS`.
pub async fn stop_on_cancel<F, Fut>(token: CancellationToken, mut stop: F)
where
    F: FnMut() -> Option<Fut>,
    Fut: Future<Output = ()>,
{
    token.cancelled().await;
    loop {
        if let Some(stopped) = stop() {
            stopped.await;
            info!("Stop requested after cancellation");
            return;
        }
        tokio::time::sleep(Duration::from_millis(STOP_RETRY_MILLIS)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial: Duration::from_secs(30),
            max: Duration::from_secs(300),
            cooldown: Duration::from_secs(600),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = policy();
        assert_eq!(policy.delay_for(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for(2), Duration::from_secs(60));
        assert_eq!(policy.delay_for(3), Duration::from_secs(120));
        assert_eq!(policy.delay_for(4), Duration::from_secs(240));
        assert_eq!(policy.delay_for(5), Duration::from_secs(600));

        let tight = RetryPolicy {
            max: Duration::from_secs(45),
            ..policy
        };
        assert_eq!(tight.delay_for(3), Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = run_supervised(policy(), CancellationToken::new(), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(TransportError::new(TransportErrorKind::Network, "connection reset"))
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = run_supervised(policy(), CancellationToken::new(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(TransportError::new(TransportErrorKind::Forbidden, "invalid token")) }
        })
        .await;
        assert_eq!(
            result.map_err(|e| e.kind()),
            Err(TransportErrorKind::Forbidden)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        let result = run_supervised(policy(), token, move || {
            canceller.cancel();
            async { Err(TransportError::new(TransportErrorKind::Network, "timeout")) }
        })
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_cancellation_and_a_running_service() {
        let token = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let waiter = tokio::spawn(stop_on_cancel(token.clone(), move || {
            // Idle on the first attempt, running afterwards.
            (counter.fetch_add(1, Ordering::SeqCst) > 0).then(|| async {})
        }));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 0);

        token.cancel();
        waiter.await.expect("stop task finishes");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
