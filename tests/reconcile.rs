mod test_support;

use std::time::Duration;

use fee_ledger::error::LedgerError;
use fee_ledger::ledger::ReconcileOutcome;
use fee_ledger::models::StudentFeeAggregate;
use test_support::{eventually, fee, harness};

fn tampered(total: f64, transport: f64) -> StudentFeeAggregate {
    StudentFeeAggregate {
        total_fees: total,
        paid_fees: 0.0,
        balance_fees: total,
        transport_fees: transport,
    }
}

#[tokio::test]
async fn matching_totals_are_left_alone() {
    let h = harness().await;
    h.store.append(fee("S1", "Tuition", 300.0)).await.unwrap();
    let patches = h.api.patch_count();

    let outcome = h.store.reconcile_student("S1").await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::InSync);
    assert_eq!(h.api.patch_count(), patches);
}

#[tokio::test]
async fn ledger_wins_when_server_disagrees() {
    let h = harness().await;
    h.store.append(fee("S1", "Tuition", 300.0)).await.unwrap();
    h.api.set_fees("S1", tampered(999.0, 75.0));

    let outcome = h.store.reconcile_student("S1").await.unwrap();
    let ReconcileOutcome::Corrected { server, ledger } = outcome else {
        panic!("expected a correction");
    };
    assert_eq!(server.total_fees, 999.0);
    assert_eq!(ledger.total_fees, 300.0);

    // Transport fees are the server's and come back as it reported them
    let now = h.api.fees("S1").unwrap();
    assert_eq!(now.total_fees, 300.0);
    assert_eq!(now.transport_fees, 75.0);
}

#[tokio::test]
async fn reconcile_all_reports_each_student() {
    let h = harness().await;
    h.store.append(fee("S1", "Tuition", 300.0)).await.unwrap();
    h.store.append(fee("S2", "Tuition", 120.0)).await.unwrap();
    h.api.set_fees("S2", tampered(0.0, 0.0));

    let report = h.store.reconcile_all().await;
    assert_eq!(report.checked(), 2);
    assert_eq!(report.in_sync, vec!["S1".to_string()]);
    assert_eq!(report.corrected, vec!["S2".to_string()]);
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn unreachable_backend_is_a_sync_error() {
    let h = harness().await;
    h.store.append(fee("S1", "Tuition", 300.0)).await.unwrap();
    h.api.fail_next_fetches(1);

    let err = h.store.reconcile_student("S1").await.unwrap_err();
    assert!(matches!(err, LedgerError::Sync { ref student_id, .. } if student_id == "S1"));

    h.api.fail_next_fetches(1);
    let report = h.store.reconcile_all().await;
    assert_eq!(report.failed.len(), 1);
}

#[tokio::test]
async fn reconciling_a_flagged_student_clears_the_flag() {
    let h = harness().await;
    h.api.fail_next_patches(1);
    h.store.append(fee("S1", "Tuition", 300.0)).await.unwrap();
    assert!(h.store.snapshot("S1").pending_sync);

    let outcome = h.store.reconcile_student("S1").await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Corrected { .. }));
    assert!(!h.store.snapshot("S1").pending_sync);
    assert!(!h.store.retry_scheduled("S1"));
}

#[tokio::test]
async fn periodic_pass_corrects_drift() {
    let h = harness().await;
    h.store.append(fee("S1", "Tuition", 300.0)).await.unwrap();
    h.api.set_fees("S1", tampered(10.0, 50.0));

    let task = h.store.spawn_periodic_reconcile(Duration::from_millis(20));
    assert!(eventually(|| h.api.fees("S1").is_some_and(|f| f.total_fees == 300.0)).await);
    task.abort();
}
