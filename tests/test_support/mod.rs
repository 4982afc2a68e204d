#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use fee_ledger::api::FakeStudentApi;
use fee_ledger::ledger::{LedgerOptions, LedgerStore, RetryPolicy};
use fee_ledger::models::{NewFeeRecord, Student, StudentFeeAggregate};
use fee_ledger::storage::MemoryStorage;

pub const KEY: &str = "feeRecords";

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn student(id: &str, name: &str, transport_fees: f64) -> Student {
    Student {
        id: id.to_string(),
        name: name.to_string(),
        section: "A".to_string(),
        fees: StudentFeeAggregate {
            transport_fees,
            ..StudentFeeAggregate::default()
        },
    }
}

pub fn fee(student_id: &str, fee_type: &str, amount: f64) -> NewFeeRecord {
    NewFeeRecord {
        student_id: student_id.to_string(),
        student_name: format!("Student {}", student_id),
        section: "A".to_string(),
        fee_type: fee_type.to_string(),
        amount,
        due_date: date(2026, 6, 1),
        description: String::new(),
    }
}

/// Retries fast enough for a test to wait them out
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_backoff_ms: 10,
        max_backoff_ms: 40,
    }
}

/// Retries that never fire while a test runs
pub fn slow_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_backoff_ms: 60_000,
        max_backoff_ms: 60_000,
    }
}

pub struct Harness {
    pub store: LedgerStore,
    pub api: Arc<FakeStudentApi>,
    pub storage: Arc<MemoryStorage>,
}

pub async fn open(api: Arc<FakeStudentApi>, storage: Arc<MemoryStorage>, retry: RetryPolicy) -> Harness {
    let store = LedgerStore::open(
        storage.clone(),
        api.clone(),
        LedgerOptions {
            key: KEY.to_string(),
            retry,
        },
    )
    .await
    .expect("open ledger");
    Harness { store, api, storage }
}

/// Two students on the backend; S1 rides the bus
pub async fn harness_with(retry: RetryPolicy) -> Harness {
    let api = Arc::new(FakeStudentApi::with_students([
        student("S1", "Asha", 50.0),
        student("S2", "Bilal", 0.0),
    ]));
    open(api, Arc::new(MemoryStorage::new()), retry).await
}

pub async fn harness() -> Harness {
    harness_with(slow_retry()).await
}

/// Poll `check` until it holds or about two seconds pass
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
