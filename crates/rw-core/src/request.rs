//! Per-request deadline and cancellation.

use crate::adapter::AdapterError;
use crate::error::{CoreError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Deadline and cancellation handle of one northbound request.
///
/// Agents run every adapter call through [`RequestContext::run`], so an
/// expired or cancelled request releases the entity lock without mutating
/// anything.
#[derive(Debug, Clone)]
pub struct RequestContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl RequestContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// A context that shares cancellation with `self` but expires earlier
    /// when `timeout` is shorter than what is left.
    pub fn child(&self, timeout: Duration) -> Self {
        Self {
            deadline: self.deadline.min(Instant::now() + timeout),
            cancel: self.cancel.child_token(),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Awaits an adapter call, giving up at the deadline or on cancellation.
    pub async fn run<T, F>(&self, operation: &str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, AdapterError>>,
    {
        let started = Instant::now();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CoreError::cancelled(operation)),
            outcome = tokio::time::timeout_at(self.deadline, call) => match outcome {
                Ok(result) => result.map_err(CoreError::from),
                Err(_) => Err(CoreError::timeout(operation, started.elapsed())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes_before_deadline() {
        let ctx = RequestContext::with_timeout(Duration::from_secs(1));
        let value = ctx.run("lookup", async { Ok::<_, AdapterError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let ctx = RequestContext::with_timeout(Duration::from_millis(20));
        let err = ctx
            .run("enable", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, AdapterError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_run_observes_cancellation() {
        let ctx = RequestContext::with_timeout(Duration::from_secs(5));
        let token = ctx.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let err = ctx
            .run("reboot", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, AdapterError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_adapter_errors_pass_through() {
        let ctx = RequestContext::with_timeout(Duration::from_secs(1));
        let err = ctx
            .run("adopt", async { Err::<(), _>(AdapterError::rejected("openolt", "no")) })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Adapter(AdapterError::Rejected { .. })));
    }

    #[test]
    fn test_child_never_outlives_parent() {
        let parent = RequestContext::with_timeout(Duration::from_millis(100));
        let child = parent.child(Duration::from_secs(10));
        assert!(child.deadline() <= parent.deadline());
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
