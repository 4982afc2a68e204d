use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::store::LedgerStore;
use crate::error::LedgerError;
use crate::models::StudentFeeAggregate;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconcileOutcome {
    /// Server totals already match the ledger
    InSync,
    /// Server totals were overwritten with the ledger's
    Corrected {
        server: StudentFeeAggregate,
        ledger: StudentFeeAggregate,
    },
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub in_sync: Vec<String>,
    pub corrected: Vec<String>,
    pub failed: Vec<(String, LedgerError)>,
}

impl ReconcileReport {
    pub fn checked(&self) -> usize {
        self.in_sync.len() + self.corrected.len() + self.failed.len()
    }
}

impl LedgerStore {
    /// Compare the server's fee totals for a student with the ledger and
    /// re-PATCH the ledger's values when they disagree.
    pub async fn reconcile_student(&self, student_id: &str) -> Result<ReconcileOutcome, LedgerError> {
        let inner = &self.inner;
        inner.retries.cancel(student_id);
        let _turn = inner.queue.acquire(student_id).await;

        let server = inner
            .api
            .fetch_student_fees(student_id)
            .await
            .map_err(|source| LedgerError::Sync {
                student_id: student_id.to_string(),
                source,
            })?;

        let aggregate = inner.aggregate_for(student_id);
        if server.agrees_with(&aggregate) {
            inner.mark_synced(student_id).await;
            return Ok(ReconcileOutcome::InSync);
        }

        let ledger = aggregate.to_student_fees(server.transport_fees);
        warn!(
            student_id,
            server_total = server.total_fees,
            server_paid = server.paid_fees,
            server_balance = server.balance_fees,
            ledger_total = ledger.total_fees,
            ledger_paid = ledger.paid_fees,
            ledger_balance = ledger.balance_fees,
            "server fee totals disagree with ledger, correcting"
        );

        match inner.api.patch_student_fees(student_id, &ledger).await {
            Ok(()) => {
                inner.mark_synced(student_id).await;
                Ok(ReconcileOutcome::Corrected { server, ledger })
            }
            Err(source) => {
                inner.mark_unsynced(student_id).await;
                inner.schedule_retry(student_id);
                Err(LedgerError::Sync {
                    student_id: student_id.to_string(),
                    source,
                })
            }
        }
    }

    /// Reconcile every student that has records in the ledger, plus unsynced
    /// students whose last record was removed
    pub async fn reconcile_all(&self) -> ReconcileReport {
        let mut students: BTreeSet<String> =
            self.records().into_iter().map(|r| r.student_id).collect();
        students.extend(self.unsynced_students());

        let mut report = ReconcileReport::default();
        for student_id in students {
            match self.reconcile_student(&student_id).await {
                Ok(ReconcileOutcome::InSync) => report.in_sync.push(student_id),
                Ok(ReconcileOutcome::Corrected { .. }) => report.corrected.push(student_id),
                Err(err) => {
                    warn!(student_id = %student_id, error = %err, "reconciliation failed");
                    report.failed.push((student_id, err));
                }
            }
        }

        info!(
            in_sync = report.in_sync.len(),
            corrected = report.corrected.len(),
            failed = report.failed.len(),
            "fee reconciliation pass finished"
        );
        report
    }

    /// Run `reconcile_all` every `period` until the store is dropped
    pub fn spawn_periodic_reconcile(&self, period: Duration) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                LedgerStore { inner }.reconcile_all().await;
            }
        })
    }
}
