use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// What a single check observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    Done,
    Pending,
    /// The condition can no longer be met; stop without waiting for the timeout.
    Failed,
}

#[derive(Debug, Error)]
pub enum PollError<E> {
    #[error("timed out waiting for the condition")]
    Timeout,
    #[error("condition failed")]
    Failed,
    #[error("check error: {0}")]
    Check(#[source] E),
}

/// Run `check` right away and then every `interval` until it is done, it fails or
/// `timeout` elapses. An error from `check` ends the wait.
pub async fn poll_until<F, Fut, E>(
    interval: Duration,
    timeout: Duration,
    mut check: F,
) -> Result<(), PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Check, E>>,
{
    let polling = async {
        loop {
            match check().await {
                Ok(Check::Done) => return Ok(()),
                Ok(Check::Failed) => return Err(PollError::Failed),
                Ok(Check::Pending) => {}
                Err(err) => return Err(PollError::Check(err)),
            }
            tokio::time::sleep(interval).await;
        }
    };
    match tokio::time::timeout(timeout, polling).await {
        Ok(result) => result,
        Err(_) => Err(PollError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_done() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), PollError<()>> =
            poll_until(Duration::from_secs(1), Duration::from_secs(10), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(if n >= 2 { Check::Done } else { Check::Pending }) }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_times_out() {
        let result: Result<(), PollError<()>> =
            poll_until(Duration::from_secs(1), Duration::from_secs(5), || async {
                Ok(Check::Pending)
            })
            .await;
        assert!(matches!(result, Err(PollError::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_fails_fast() {
        let start = tokio::time::Instant::now();
        let result: Result<(), PollError<()>> =
            poll_until(Duration::from_secs(1), Duration::from_secs(300), || async {
                Ok(Check::Failed)
            })
            .await;
        assert!(matches!(result, Err(PollError::Failed)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_check_error() {
        let result = poll_until(Duration::from_secs(1), Duration::from_secs(5), || async {
            Err::<Check, _>("unreachable")
        })
        .await;
        assert!(matches!(result, Err(PollError::Check("unreachable"))));
    }
}
