//! Visibility heartbeat (C7): a background extender of the queue lease for
//! in-flight work.
//!
//! Implements REDESIGN FLAG "Thread-based heartbeat with shared mutable
//! flags -> a cooperating task/goroutine with a stop channel and a single
//! final result value" — this is a `tokio::spawn`-ed task, not an OS thread,
//! and no flag is ever mutated from outside the task while it runs. The
//! orchestrator only reads the outcome after `.await`-ing the `JoinHandle`,
//! mirroring `SchedulerEngine::run`'s `tokio::select!` over a `watch`
//! channel.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// The single final result of a heartbeat run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Stopped cleanly; every extension succeeded.
    Stopped,
    /// The first extension error was recorded and the loop exited; no
    /// further extensions were attempted. A heartbeat error is treated as
    /// if processing failed (SPEC_FULL.md §5).
    Failed(String),
}

impl HeartbeatOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, HeartbeatOutcome::Failed(_))
    }
}

/// A running heartbeat task. `stop` is idempotent and must be called on
/// every exit path of the owning orchestrator.
pub struct Heartbeat {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<HeartbeatOutcome>,
    interval: Duration,
}

impl Heartbeat {
    /// Spawn the task. Every `interval` it calls `extend`; the first error
    /// ends the loop (no further extensions). `extend` is expected to
    /// request a new visibility timeout greater than `interval + margin` —
    /// that arithmetic lives with the caller, since only the caller knows
    /// the queue's default extension amount.
    pub fn start<F, Fut>(interval: Duration, extend: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "heartbeat started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        match extend().await {
                            Ok(()) => continue,
                            Err(e) => {
                                error!("heartbeat extension failed, stopping: {e}");
                                return HeartbeatOutcome::Failed(e);
                            }
                        }
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            info!("heartbeat stopped cooperatively");
                            return HeartbeatOutcome::Stopped;
                        }
                    }
                }
            }
        });

        Self { stop_tx, handle, interval }
    }

    /// Signal the task to stop and wait up to `interval + 10s` for it to
    /// exit, returning its single final outcome. Idempotent: calling this
    /// more than once is safe because the `watch` send is a no-op once the
    /// task has already exited.
    pub async fn stop(self) -> HeartbeatOutcome {
        let _ = self.stop_tx.send(true);
        let deadline = self.interval + Duration::from_secs(10);
        match tokio::time::timeout(deadline, self.handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => {
                warn!("heartbeat task panicked: {join_err}");
                HeartbeatOutcome::Failed(format!("heartbeat task panicked: {join_err}"))
            }
            Err(_) => {
                warn!("heartbeat task did not exit within the stop deadline");
                HeartbeatOutcome::Failed("heartbeat stop timed out".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn stop_before_any_tick_reports_stopped() {
        let hb = Heartbeat::start(Duration::from_secs(60), || async { Ok(()) });
        let outcome = hb.stop().await;
        assert_eq!(outcome, HeartbeatOutcome::Stopped);
    }

    #[tokio::test]
    async fn extension_error_ends_the_loop_and_is_reported() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let hb = Heartbeat::start(Duration::from_millis(5), move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("lease expired".to_string())
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let outcome = hb.stop().await;
        assert_eq!(outcome, HeartbeatOutcome::Failed("lease expired".to_string()));
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn stop_is_idempotent_in_effect_on_an_already_finished_task() {
        let hb = Heartbeat::start(Duration::from_millis(5), || async { Err("boom".to_string()) });
        tokio::time::sleep(Duration::from_millis(30)).await;
        let outcome = hb.stop().await;
        assert!(outcome.is_failed());
    }
}
