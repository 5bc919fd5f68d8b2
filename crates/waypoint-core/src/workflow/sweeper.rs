//! Periodic retention sweep over a `StateRepository`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use waypoint_types::error::RepositoryError;

use crate::repository::state::StateRepository;

/// Calls `delete_expired` on a fixed interval until cancelled.
pub struct ExpirySweeper<R> {
    repo: R,
    interval: Duration,
}

impl<R: StateRepository + 'static> ExpirySweeper<R> {
    pub fn new(repo: R, interval: Duration) -> Self {
        Self {
            repo,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run a single sweep. Returns the number of runs removed.
    pub async fn sweep_once(&self) -> Result<u64, RepositoryError> {
        let removed = self.repo.delete_expired().await?;
        if removed > 0 {
            tracing::info!(removed, "swept expired workflow runs");
        } else {
            tracing::debug!("no expired workflow runs");
        }
        Ok(removed)
    }

    /// Sweep in the background until `shutdown` is cancelled.
    ///
    /// The first sweep runs immediately. Errors are logged and the loop
    /// keeps going; the task returns the total number of runs removed.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<u64> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut total = 0u64;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match self.sweep_once().await {
                            Ok(removed) => total += removed,
                            Err(e) => tracing::warn!(error = %e, "expiry sweep failed"),
                        }
                    }
                }
            }

            tracing::debug!(total, "expiry sweeper stopped");
            total
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use uuid::Uuid;
    use waypoint_types::workflow::{WorkflowState, WorkflowStatus};

    /// Reports one expired run per sweep and counts calls.
    #[derive(Default)]
    struct CountingRepo {
        sweeps: AtomicU64,
    }

    impl StateRepository for CountingRepo {
        async fn save(&self, _state: &WorkflowState) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn find(&self, _run_id: &Uuid) -> Result<Option<WorkflowState>, RepositoryError> {
            Ok(None)
        }

        async fn find_by_workflow(&self, _id: &str) -> Result<Vec<WorkflowState>, RepositoryError> {
            Ok(Vec::new())
        }

        async fn find_by_status(
            &self,
            _status: WorkflowStatus,
        ) -> Result<Vec<WorkflowState>, RepositoryError> {
            Ok(Vec::new())
        }

        async fn delete(&self, _run_id: &Uuid) -> Result<bool, RepositoryError> {
            Ok(false)
        }

        async fn delete_expired(&self) -> Result<u64, RepositoryError> {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }
    }

    #[tokio::test]
    async fn sweep_once_reports_removed() {
        let repo = Arc::new(CountingRepo::default());
        let sweeper = ExpirySweeper::new(repo.clone(), Duration::from_secs(60));

        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        assert_eq!(repo.sweeps.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn spawned_sweeper_stops_on_cancel() {
        let repo = Arc::new(CountingRepo::default());
        let token = CancellationToken::new();
        let handle =
            ExpirySweeper::new(repo.clone(), Duration::from_millis(10)).spawn(token.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        let total = handle.await.unwrap();

        assert!(total >= 1);
        assert_eq!(total, repo.sweeps.load(Ordering::SeqCst));
    }
}
