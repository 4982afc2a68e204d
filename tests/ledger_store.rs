mod test_support;

use std::sync::{Arc, Mutex};

use fee_ledger::error::{LedgerError, StorageError};
use fee_ledger::ledger::{recompute_aggregate, ChangeKind, FeeAggregate};
use fee_ledger::models::{FeeRecordPatch, FeeStatus, StudentFeeAggregate};
use fee_ledger::storage::MemoryStorage;
use test_support::{date, fee, harness, open, slow_retry, KEY};

fn assert_balanced(aggregate: FeeAggregate) {
    assert!(
        (aggregate.total - aggregate.paid - aggregate.balance).abs() < 1e-9,
        "unbalanced aggregate {:?}",
        aggregate
    );
}

#[tokio::test]
async fn two_fees_add_up_and_reach_the_server() {
    let h = harness().await;

    h.store.append(fee("S1", "Tuition", 500.0)).await.unwrap();
    h.store.append(fee("S1", "Transport", 200.0)).await.unwrap();

    let snapshot = h.store.snapshot("S1");
    assert_eq!(
        snapshot.aggregate,
        FeeAggregate { total: 700.0, paid: 0.0, balance: 700.0 }
    );
    assert!(!snapshot.pending_sync);
    assert_eq!(
        h.api.fees("S1"),
        Some(StudentFeeAggregate {
            total_fees: 700.0,
            paid_fees: 0.0,
            balance_fees: 700.0,
            transport_fees: 50.0,
        })
    );
    assert_eq!(h.api.patch_count(), 2);
}

#[tokio::test]
async fn marking_the_only_fee_paid_clears_the_balance() {
    let h = harness().await;
    let record = h.store.append(fee("S2", "Tuition", 100.0)).await.unwrap();

    let paid = h.store.mark_paid(&record.id, date(2026, 5, 2)).await.unwrap();
    assert_eq!(paid.status, FeeStatus::Paid);
    assert_eq!(paid.paid_date, Some(date(2026, 5, 2)));

    assert_eq!(
        h.store.snapshot("S2").aggregate,
        FeeAggregate { total: 100.0, paid: 100.0, balance: 0.0 }
    );
    let server = h.api.fees("S2").unwrap();
    assert_eq!((server.total_fees, server.paid_fees, server.balance_fees), (100.0, 100.0, 0.0));
}

#[tokio::test]
async fn balance_holds_after_every_kind_of_change() {
    let h = harness().await;

    let tuition = h.store.append(fee("S1", "Tuition", 1200.0)).await.unwrap();
    assert_balanced(h.store.snapshot("S1").aggregate);

    let library = h.store.append(fee("S1", "Library", 80.5)).await.unwrap();
    assert_balanced(h.store.snapshot("S1").aggregate);

    h.store.mark_paid(&library.id, date(2026, 5, 1)).await.unwrap();
    assert_balanced(h.store.snapshot("S1").aggregate);

    h.store
        .update(
            &tuition.id,
            FeeRecordPatch {
                amount: Some(1000.0),
                ..FeeRecordPatch::default()
            },
        )
        .await
        .unwrap();
    assert_balanced(h.store.snapshot("S1").aggregate);

    h.store.remove(&library.id).await.unwrap();
    let aggregate = h.store.snapshot("S1").aggregate;
    assert_balanced(aggregate);
    assert_eq!(aggregate, FeeAggregate { total: 1000.0, paid: 0.0, balance: 1000.0 });

    let server = h.api.fees("S1").unwrap();
    assert!(server.agrees_with(&aggregate));
}

#[tokio::test]
async fn recomputing_twice_gives_the_same_totals() {
    let h = harness().await;
    h.store.append(fee("S1", "Tuition", 300.0)).await.unwrap();
    h.store.append(fee("S2", "Sports", 40.0)).await.unwrap();

    let records = h.store.records();
    assert_eq!(
        recompute_aggregate(&records, "S1"),
        recompute_aggregate(&records, "S1")
    );
    assert_eq!(recompute_aggregate(&records, "S1").total, 300.0);
    assert_eq!(recompute_aggregate(&records, "nobody"), FeeAggregate::default());
}

#[tokio::test]
async fn removing_twice_reports_not_found() {
    let h = harness().await;
    let record = h.store.append(fee("S1", "Tuition", 100.0)).await.unwrap();

    let removed = h.store.remove(&record.id).await.unwrap();
    assert_eq!(removed.id, record.id);

    let err = h.store.remove(&record.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(id) if id == record.id));
    assert_eq!(h.store.snapshot("S1").aggregate, FeeAggregate::default());
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let h = harness().await;
    assert!(matches!(
        h.store.mark_paid("missing", date(2026, 1, 1)).await,
        Err(LedgerError::NotFound(_))
    ));
    assert!(matches!(
        h.store.update("missing", FeeRecordPatch::default()).await,
        Err(LedgerError::NotFound(_))
    ));
    assert_eq!(h.api.patch_count(), 0);
}

#[tokio::test]
async fn invalid_input_changes_nothing() {
    let h = harness().await;
    let record = h.store.append(fee("S1", "Tuition", 100.0)).await.unwrap();
    let version = h.store.version();

    let err = h.store.append(fee("S1", "Tuition", -5.0)).await.unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    let err = h.store.append(fee("  ", "Tuition", 5.0)).await.unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    let err = h
        .store
        .update(
            &record.id,
            FeeRecordPatch {
                fee_type: Some(String::new()),
                ..FeeRecordPatch::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    assert_eq!(h.store.version(), version);
    assert_eq!(h.store.records().len(), 1);
    assert_eq!(h.api.patch_count(), 1);
}

#[tokio::test]
async fn storage_failure_leaves_memory_and_server_untouched() {
    let api = Arc::new(fee_ledger::api::FakeStudentApi::with_students([
        test_support::student("S1", "Asha", 0.0),
    ]));
    let h = open(api, Arc::new(MemoryStorage::with_quota(64)), slow_retry()).await;

    let err = h.store.append(fee("S1", "Tuition", 100.0)).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Storage(StorageError::QuotaExceeded { .. })
    ));
    assert!(h.store.records().is_empty());
    assert_eq!(h.store.version(), 0);
    assert_eq!(h.api.patch_count(), 0);
    assert!(h.storage.get(KEY).is_none());
}

#[tokio::test]
async fn subscribers_hear_about_changes_after_they_are_durable() {
    let h = harness().await;
    let seen: Arc<Mutex<Vec<(ChangeKind, Option<String>)>>> = Arc::default();

    let subscription = {
        let seen = seen.clone();
        let storage = h.storage.clone();
        h.store.subscribe(move |change| {
            seen.lock().unwrap().push((change.kind, storage.get(KEY)));
        })
    };

    let record = h.store.append(fee("S1", "Tuition", 100.0)).await.unwrap();

    let seen_now = seen.lock().unwrap().clone();
    let (kind, stored) = &seen_now[0];
    assert_eq!(*kind, ChangeKind::Appended);
    assert!(stored.as_deref().unwrap_or_default().contains(&record.id));

    subscription.unsubscribe();
    let before = seen.lock().unwrap().len();
    h.store.remove(&record.id).await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), before);
}

#[tokio::test]
async fn late_subscriber_reads_current_state_from_snapshot() {
    let h = harness().await;
    h.store.append(fee("S1", "Tuition", 250.0)).await.unwrap();

    let _subscription = h.store.subscribe(|_| {});
    let snapshot = h.store.snapshot("S1");
    assert_eq!(snapshot.records.len(), 1);
    assert_eq!(snapshot.aggregate.total, 250.0);
    assert_eq!(snapshot.version, h.store.version());
}

#[tokio::test]
async fn reopening_restores_the_ledger() {
    let h = harness().await;
    let record = h.store.append(fee("S1", "Tuition", 100.0)).await.unwrap();
    h.store.mark_paid(&record.id, date(2026, 5, 1)).await.unwrap();
    let records = h.store.records();

    let reopened = open(h.api.clone(), h.storage.clone(), slow_retry()).await;
    assert_eq!(reopened.store.records(), records);
    assert_eq!(
        reopened.store.snapshot("S1").aggregate,
        FeeAggregate { total: 100.0, paid: 100.0, balance: 0.0 }
    );
}

#[tokio::test]
async fn corrupt_storage_fails_to_open() {
    let storage = Arc::new(MemoryStorage::new());
    storage.insert(KEY, "{not json");

    let result = fee_ledger::ledger::LedgerStore::open(
        storage,
        Arc::new(fee_ledger::api::FakeStudentApi::new()),
        fee_ledger::ledger::LedgerOptions::default(),
    )
    .await;
    assert!(matches!(
        result,
        Err(LedgerError::Storage(StorageError::Decode { .. }))
    ));
}

#[tokio::test]
async fn overdue_refresh_only_touches_late_pending_fees() {
    let h = harness().await;
    let late = h.store.append(fee("S1", "Tuition", 100.0)).await.unwrap();
    let paid = h.store.append(fee("S1", "Library", 20.0)).await.unwrap();
    h.store.mark_paid(&paid.id, date(2026, 5, 1)).await.unwrap();
    let mut upcoming = fee("S2", "Sports", 30.0);
    upcoming.due_date = date(2026, 12, 1);
    let upcoming = h.store.append(upcoming).await.unwrap();

    let changed = h.store.refresh_overdue(date(2026, 7, 1)).await.unwrap();
    assert_eq!(changed, 1);
    assert_eq!(h.store.record(&late.id).unwrap().status, FeeStatus::Overdue);
    assert_eq!(h.store.record(&paid.id).unwrap().status, FeeStatus::Paid);
    assert_eq!(h.store.record(&upcoming.id).unwrap().status, FeeStatus::Pending);

    assert_eq!(h.store.refresh_overdue(date(2026, 7, 1)).await.unwrap(), 0);
}

#[tokio::test]
async fn editing_status_back_from_paid_clears_the_paid_date() {
    let h = harness().await;
    let record = h.store.append(fee("S1", "Tuition", 100.0)).await.unwrap();
    h.store.mark_paid(&record.id, date(2026, 5, 1)).await.unwrap();

    let edited = h
        .store
        .update(
            &record.id,
            FeeRecordPatch {
                status: Some(FeeStatus::Pending),
                ..FeeRecordPatch::default()
            },
        )
        .await
        .unwrap();
    assert!(edited.paid_date.is_none());
    assert_eq!(h.store.snapshot("S1").aggregate.paid, 0.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_for_one_student_leave_server_current() {
    let h = harness().await;

    let mut tasks = Vec::new();
    for i in 0..10 {
        let store = h.store.clone();
        tasks.push(tokio::spawn(async move {
            store.append(fee("S1", &format!("Fee {}", i), 100.0)).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(h.store.records().len(), 10);
    let aggregate = h.store.snapshot("S1").aggregate;
    assert_eq!(aggregate.total, 1000.0);
    assert!(h.api.fees("S1").unwrap().agrees_with(&aggregate));
    assert_eq!(h.api.patch_count(), 10);
}

#[tokio::test]
async fn summary_groups_records_by_student() {
    let h = harness().await;
    h.store.append(fee("S1", "Tuition", 100.0)).await.unwrap();
    h.store.append(fee("S1", "Library", 50.0)).await.unwrap();
    h.store.append(fee("S2", "Tuition", 75.0)).await.unwrap();

    let summary = h.store.summary();
    assert_eq!(summary.students.len(), 2);
    assert_eq!(summary.students[0].student_id, "S1");
    assert_eq!(summary.students[0].record_count, 2);
    assert_eq!(summary.totals.total, 225.0);
    assert_eq!(summary.unsynced_students(), 0);
}
