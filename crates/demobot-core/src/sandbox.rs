//! Bounded execution of handlers.
//!
//! Every command/inline handler runs as its own tokio task with a deadline. A
//! supervisor task aborts the handler when the deadline passes. Abort takes
//! effect at the handler's next `.await`; code that never yields cannot be
//! interrupted this way, which we accept instead of killing OS threads.

use std::{future::Future, time::Duration};

use tokio::task::JoinHandle;

use crate::{errors::Error, Result};

/// How a bounded handler ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundedOutcome {
    Completed,
    TimedOut,
    Panicked,
}

/// Default and maximum deadline for one handler flavor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub default: Duration,
    pub ceiling: Duration,
}

pub const COMMAND_TIMEOUT: TimeoutPolicy = TimeoutPolicy {
    default: Duration::from_secs(300),
    ceiling: Duration::from_secs(600),
};

pub const INLINE_TIMEOUT: TimeoutPolicy = TimeoutPolicy {
    default: Duration::from_secs(1),
    ceiling: Duration::from_secs(60),
};

impl TimeoutPolicy {
    /// Pick the requested timeout (or the default), rejecting anything above the ceiling.
    pub fn resolve(&self, requested: Option<Duration>) -> Result<Duration> {
        let timeout = requested.unwrap_or(self.default);
        if timeout > self.ceiling {
            return Err(Error::Config(format!(
                "handler timeout {}s exceeds the {}s limit",
                timeout.as_secs(),
                self.ceiling.as_secs()
            )));
        }
        Ok(timeout)
    }
}

/// Run `fut` as an independent task, aborting it after `timeout`.
///
/// Returns immediately. The returned handle resolves once the handler has
/// finished or has been torn down; dispatchers are free to drop it.
pub fn run_bounded<F>(
    label: impl Into<String>,
    timeout: Duration,
    fut: F,
) -> JoinHandle<BoundedOutcome>
where
    F: Future<Output = ()> + Send + 'static,
{
    let label = label.into();
    let mut worker = tokio::spawn(fut);

    tokio::spawn(async move {
        match tokio::time::timeout(timeout, &mut worker).await {
            Ok(Ok(())) => {
                tracing::debug!(handler = %label, "handler finished");
                BoundedOutcome::Completed
            }
            Ok(Err(e)) => {
                tracing::warn!(handler = %label, "handler failed: {e}");
                BoundedOutcome::Panicked
            }
            Err(_) => {
                worker.abort();
                // Wait for the abort to land so the handler's state is dropped.
                let _ = worker.await;
                tracing::warn!(
                    handler = %label,
                    timeout_secs = timeout.as_secs_f64(),
                    "handler exceeded its deadline and was cancelled"
                );
                BoundedOutcome::TimedOut
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };
    use tokio::time::Instant;

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn policy_defaults_and_ceilings() {
        assert_eq!(COMMAND_TIMEOUT.resolve(None).unwrap(), Duration::from_secs(300));
        assert_eq!(
            COMMAND_TIMEOUT
                .resolve(Some(Duration::from_secs(600)))
                .unwrap(),
            Duration::from_secs(600)
        );
        assert!(matches!(
            COMMAND_TIMEOUT.resolve(Some(Duration::from_secs(601))),
            Err(Error::Config(_))
        ));
        assert_eq!(INLINE_TIMEOUT.resolve(None).unwrap(), Duration::from_secs(1));
        assert!(INLINE_TIMEOUT.resolve(Some(Duration::from_secs(61))).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn never_returning_handler_is_cancelled_at_its_deadline() {
        let dropped = Arc::new(AtomicBool::new(false));
        let guard = SetOnDrop(dropped.clone());
        let started = Instant::now();

        let outcome = run_bounded("stuck", Duration::from_secs(1), async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        })
        .await
        .unwrap();

        assert_eq!(outcome, BoundedOutcome::TimedOut);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
        assert!(dropped.load(Ordering::SeqCst), "handler state must be dropped");
    }

    #[tokio::test(start_paused = true)]
    async fn run_bounded_returns_before_the_handler_runs() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let handle = run_bounded("slow", Duration::from_secs(10), async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            flag.store(true, Ordering::SeqCst);
        });
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(handle.await.unwrap(), BoundedOutcome::Completed);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panicking_handler_is_contained() {
        let outcome = run_bounded("boom", Duration::from_secs(1), async {
            panic!("handler bug");
        })
        .await
        .unwrap();
        assert_eq!(outcome, BoundedOutcome::Panicked);
    }

    #[tokio::test(start_paused = true)]
    async fn runaway_handler_does_not_starve_others() {
        let stuck = run_bounded("stuck", Duration::from_secs(30), std::future::pending());
        let quick = run_bounded("quick", Duration::from_secs(1), async {});
        assert_eq!(quick.await.unwrap(), BoundedOutcome::Completed);
        assert_eq!(stuck.await.unwrap(), BoundedOutcome::TimedOut);
    }
}
