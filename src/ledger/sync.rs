use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::store::{Inner, LedgerStore};
use super::subscription::ChangeKind;
use crate::error::LedgerError;
use crate::models::{StudentFeeAggregate, SyncState};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

pub trait BackoffPolicy {
    fn delay_for_attempt(&self, attempt: usize) -> Duration;
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl BackoffPolicy for RetryPolicy {
    /// Doubles from `base_backoff_ms` for attempt 1, capped at `max_backoff_ms`
    fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as u32;
        let delay = self
            .base_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }
}

/// Outstanding background retries, at most one per student
#[derive(Default)]
pub struct RetryTasks {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl RetryTasks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Abort the student's retry, if one is still running
    pub fn cancel(&self, student_id: &str) {
        if let Some(task) = self.lock().remove(student_id)
            && !task.is_finished()
        {
            task.abort();
            info!(student_id, "superseded fee sync retry aborted");
        }
    }

    fn replace(&self, student_id: &str, task: JoinHandle<()>) {
        if let Some(previous) = self.lock().insert(student_id.to_string(), task) {
            previous.abort();
        }
    }

    pub fn is_scheduled(&self, student_id: &str) -> bool {
        self.lock()
            .get(student_id)
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for RetryTasks {
    fn drop(&mut self) {
        for (_, task) in self.lock().drain() {
            task.abort();
        }
    }
}

impl Inner {
    /// PATCH the student's recomputed aggregate. Caller holds the student's turn.
    ///
    /// Transport fees belong to the server and may change between mutations,
    /// so the current value is read back right before every PATCH.
    pub(super) async fn push_fees(&self, student_id: &str) -> Result<StudentFeeAggregate, LedgerError> {
        let sync_error = |source| LedgerError::Sync {
            student_id: student_id.to_string(),
            source,
        };

        let server = self
            .api
            .fetch_student_fees(student_id)
            .await
            .map_err(sync_error)?;
        let fees = self
            .aggregate_for(student_id)
            .to_student_fees(server.transport_fees);
        self.api
            .patch_student_fees(student_id, &fees)
            .await
            .map_err(sync_error)?;
        Ok(fees)
    }

    /// Push after a mutation; on failure flag the student and retry in the background
    pub(super) async fn sync_student(self: &Arc<Self>, student_id: &str) {
        self.retries.cancel(student_id);
        match self.push_fees(student_id).await {
            Ok(fees) => {
                info!(
                    student_id,
                    total = fees.total_fees,
                    paid = fees.paid_fees,
                    balance = fees.balance_fees,
                    "student fees synced"
                );
                self.mark_synced(student_id).await;
            }
            Err(err) => {
                warn!(student_id, error = %err, "student fee sync failed, will retry");
                self.mark_unsynced(student_id).await;
                self.schedule_retry(student_id);
            }
        }
    }

    pub(super) async fn mark_synced(&self, student_id: &str) {
        let was_unsynced = self.write().unsynced.remove(student_id);
        if was_unsynced {
            self.persist_unsynced(student_id).await;
        }
        self.set_sync_state(student_id, SyncState::Synced, was_unsynced)
            .await;
    }

    pub(super) async fn mark_unsynced(&self, student_id: &str) {
        let newly_unsynced = self.write().unsynced.insert(student_id.to_string());
        if newly_unsynced {
            self.persist_unsynced(student_id).await;
        }
        self.set_sync_state(student_id, SyncState::PendingSync, newly_unsynced)
            .await;
    }

    async fn persist_unsynced(&self, student_id: &str) {
        if let Err(err) = self.save_unsynced().await {
            error!(student_id, error = %err, "could not persist unsynced students");
        }
    }

    /// Persist the sync flag on the student's records. The record data itself
    /// is already durable, so a storage failure here only loses the flag.
    async fn set_sync_state(&self, student_id: &str, target: SyncState, changed: bool) {
        let needs_write = self
            .read()
            .records
            .iter()
            .any(|r| r.student_id == student_id && r.sync_state != target);

        if !needs_write {
            if changed {
                self.notify(student_id, ChangeKind::SyncStateChanged);
            }
            return;
        }

        let result = self
            .commit(Some(student_id), ChangeKind::SyncStateChanged, |records| {
                for record in records.iter_mut().filter(|r| r.student_id == student_id) {
                    record.sync_state = target;
                }
                Ok(())
            })
            .await;
        if let Err(err) = result {
            error!(student_id, error = %err, "could not persist fee sync state");
            self.notify(student_id, ChangeKind::SyncStateChanged);
        }
    }

    pub(super) fn schedule_retry(self: &Arc<Self>, student_id: &str) {
        let inner = Arc::downgrade(self);
        let policy = self.retry_policy.clone();
        let student_id = student_id.to_string();

        let task = tokio::spawn({
            let student_id = student_id.clone();
            async move {
                for attempt in 1..=policy.max_attempts {
                    tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };

                    let _turn = inner.queue.acquire(&student_id).await;
                    match inner.push_fees(&student_id).await {
                        Ok(_) => {
                            info!(student_id = %student_id, attempt, "student fees synced on retry");
                            inner.mark_synced(&student_id).await;
                            return;
                        }
                        Err(err) => {
                            warn!(student_id = %student_id, attempt, error = %err, "fee sync retry failed");
                        }
                    }
                }
                error!(
                    student_id = %student_id,
                    attempts = policy.max_attempts,
                    "giving up on fee sync, student stays unsynced"
                );
            }
        });

        self.retries.replace(&student_id, task);
    }
}

impl LedgerStore {
    /// Push every unsynced student's aggregate now, ahead of any scheduled retry
    pub async fn retry_pending(&self) -> Vec<(String, Result<StudentFeeAggregate, LedgerError>)> {
        let mut results = Vec::new();
        for student_id in self.unsynced_students() {
            self.inner.retries.cancel(&student_id);
            let _turn = self.inner.queue.acquire(&student_id).await;

            let result = self.inner.push_fees(&student_id).await;
            match &result {
                Ok(_) => {
                    info!(student_id = %student_id, "unsynced student fees pushed");
                    self.inner.mark_synced(&student_id).await;
                }
                Err(err) => {
                    warn!(student_id = %student_id, error = %err, "manual fee sync failed");
                    self.inner.mark_unsynced(&student_id).await;
                    self.inner.schedule_retry(&student_id);
                }
            }
            results.push((student_id, result));
        }
        results
    }

    /// Whether a background retry is still outstanding for the student
    pub fn retry_scheduled(&self, student_id: &str) -> bool {
        self.inner.retries.is_scheduled(student_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_backoff_ms: 100,
            max_backoff_ms: 1_000,
        };
        let delays: Vec<u64> = (1..=6)
            .map(|attempt| policy.delay_for_attempt(attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(usize::MAX), Duration::from_millis(30_000));
    }
}
