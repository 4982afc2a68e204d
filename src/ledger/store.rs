use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::NaiveDate;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use super::aggregate::{recompute_aggregate, summarize, FeeAggregate};
use super::queue::{StudentQueue, StudentTurn};
use super::subscription::{ChangeKind, LedgerChange, Subscribers, Subscription};
use super::sync::{RetryPolicy, RetryTasks};
use crate::api::{StudentApi, StudentQuery};
use crate::error::{ApiError, LedgerError, StorageError};
use crate::models::{FeeRecord, FeeRecordPatch, FeeStatus, NewFeeRecord, Student};
use crate::storage::LedgerStorage;

pub const DEFAULT_LEDGER_KEY: &str = "feeRecords";

/// Suffix of the key that lists students whose totals never reached the server
const UNSYNCED_SUFFIX: &str = ".unsynced";

#[derive(Debug, Clone)]
pub struct LedgerOptions {
    /// Storage key holding the serialized record array
    pub key: String,
    pub retry: RetryPolicy,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            key: DEFAULT_LEDGER_KEY.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// One student's records and totals as of `version`
#[derive(Debug, Clone, PartialEq)]
pub struct StudentSnapshot {
    pub student_id: String,
    pub records: Vec<FeeRecord>,
    pub aggregate: FeeAggregate,
    /// The server aggregate is behind the ledger
    pub pending_sync: bool,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentSummary {
    pub student_id: String,
    pub student_name: String,
    pub section: String,
    pub record_count: usize,
    pub aggregate: FeeAggregate,
    pub pending_sync: bool,
}

/// Dashboard view over the whole ledger
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSummary {
    pub students: Vec<StudentSummary>,
    pub totals: FeeAggregate,
    pub version: u64,
}

impl LedgerSummary {
    pub fn unsynced_students(&self) -> usize {
        self.students.iter().filter(|s| s.pending_sync).count()
    }
}

#[derive(Default)]
pub(super) struct LedgerState {
    pub(super) records: Vec<FeeRecord>,
    pub(super) version: u64,
    /// Students whose latest aggregate has not reached the server.
    /// Saved under its own key, since a student may have no records left.
    pub(super) unsynced: BTreeSet<String>,
}

pub(super) struct Inner {
    storage: Arc<dyn LedgerStorage>,
    pub(super) api: Arc<dyn StudentApi>,
    key: String,
    unsynced_key: String,
    state: RwLock<LedgerState>,
    commit_lock: AsyncMutex<()>,
    pub(super) queue: StudentQueue,
    subscribers: Subscribers,
    pub(super) retries: RetryTasks,
    pub(super) retry_policy: RetryPolicy,
}

impl Inner {
    pub(super) fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(super) fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(super) fn aggregate_for(&self, student_id: &str) -> FeeAggregate {
        recompute_aggregate(&self.read().records, student_id)
    }

    pub(super) fn student_of(&self, id: &str) -> Result<String, LedgerError> {
        self.read()
            .records
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.student_id.clone())
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))
    }

    /// Read-modify-write of the whole record array.
    ///
    /// Writes are serialized by the commit lock, and memory is only replaced
    /// once storage accepted the new array. Subscribers hear about the change
    /// after that, before this returns.
    pub(super) async fn commit<T, F>(
        &self,
        student_id: Option<&str>,
        kind: ChangeKind,
        change: F,
    ) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut Vec<FeeRecord>) -> Result<T, LedgerError>,
    {
        let event = {
            let _commit = self.commit_lock.lock().await;

            let mut records = self.read().records.clone();
            let output = change(&mut records)?;

            let encoded = serde_json::to_string(&records).map_err(StorageError::Encode)?;
            self.storage.save(&self.key, &encoded).await?;

            let mut state = self.write();
            state.records = records;
            state.version += 1;
            debug!(version = state.version, ?kind, student_id, "ledger committed");

            (
                LedgerChange {
                    version: state.version,
                    student_id: student_id.map(str::to_string),
                    kind,
                },
                output,
            )
        };

        self.subscribers.notify(&event.0);
        Ok(event.1)
    }

    /// Tell subscribers about a change that did not touch storage
    pub(super) fn notify(&self, student_id: &str, kind: ChangeKind) {
        let change = LedgerChange {
            version: self.read().version,
            student_id: Some(student_id.to_string()),
            kind,
        };
        self.subscribers.notify(&change);
    }

    /// Persist the unsynced student set. Shares the commit lock with the
    /// record array so concurrent writers cannot save a stale set.
    pub(super) async fn save_unsynced(&self) -> Result<(), LedgerError> {
        let _commit = self.commit_lock.lock().await;
        let students: Vec<String> = self.read().unsynced.iter().cloned().collect();
        let encoded = serde_json::to_string(&students).map_err(StorageError::Encode)?;
        self.storage.save(&self.unsynced_key, &encoded).await?;
        Ok(())
    }
}

async fn load_json<T>(storage: &dyn LedgerStorage, key: &str) -> Result<Option<T>, LedgerError>
where
    T: serde::de::DeserializeOwned,
{
    let Some(raw) = storage.load(key).await?.filter(|raw| !raw.trim().is_empty()) else {
        return Ok(None);
    };
    let value = serde_json::from_str(&raw).map_err(|source| StorageError::Decode {
        key: key.to_string(),
        source,
    })?;
    Ok(Some(value))
}

/// Authoritative in-memory fee ledger backed by durable storage and mirrored
/// onto the students' server-side fee aggregates.
///
/// Clones share the same ledger.
#[derive(Clone)]
pub struct LedgerStore {
    pub(super) inner: Arc<Inner>,
}

impl LedgerStore {
    /// Load the ledger from `storage`. Students left unsynced by an earlier
    /// session get a background retry right away.
    pub async fn open(
        storage: Arc<dyn LedgerStorage>,
        api: Arc<dyn StudentApi>,
        options: LedgerOptions,
    ) -> Result<Self, LedgerError> {
        let unsynced_key = format!("{}{}", options.key, UNSYNCED_SUFFIX);
        let records: Vec<FeeRecord> = load_json(storage.as_ref(), &options.key)
            .await?
            .unwrap_or_default();
        let mut unsynced: BTreeSet<String> = load_json(storage.as_ref(), &unsynced_key)
            .await?
            .unwrap_or_default();
        unsynced.extend(
            records
                .iter()
                .filter(|r| r.is_pending_sync())
                .map(|r| r.student_id.clone()),
        );

        info!(
            key = %options.key,
            records = records.len(),
            unsynced = unsynced.len(),
            "fee ledger loaded"
        );

        let inner = Arc::new(Inner {
            storage,
            api,
            key: options.key,
            unsynced_key,
            state: RwLock::new(LedgerState {
                records,
                version: 0,
                unsynced: unsynced.clone(),
            }),
            commit_lock: AsyncMutex::new(()),
            queue: StudentQueue::new(),
            subscribers: Subscribers::new(),
            retries: RetryTasks::new(),
            retry_policy: options.retry,
        });

        for student_id in &unsynced {
            inner.schedule_retry(student_id);
        }

        Ok(Self { inner })
    }

    /// Abort any stale retry for the student, then wait for its turn
    async fn begin(&self, student_id: &str) -> StudentTurn {
        self.inner.retries.cancel(student_id);
        self.inner.queue.acquire(student_id).await
    }

    fn committed(&self, id: &str) -> Result<FeeRecord, LedgerError> {
        self.record(id).ok_or_else(|| LedgerError::NotFound(id.to_string()))
    }

    pub async fn append(&self, input: NewFeeRecord) -> Result<FeeRecord, LedgerError> {
        input.validate()?;
        let student_id = input.student_id.clone();
        let record = input.into_record();
        let id = record.id.clone();

        let _turn = self.begin(&student_id).await;
        self.inner
            .commit(Some(&student_id), ChangeKind::Appended, |records| {
                records.push(record);
                Ok(())
            })
            .await?;
        info!(id = %id, student_id = %student_id, "fee record appended");

        self.inner.sync_student(&student_id).await;
        self.committed(&id)
    }

    pub async fn update(&self, id: &str, patch: FeeRecordPatch) -> Result<FeeRecord, LedgerError> {
        patch.validate()?;
        let student_id = self.inner.student_of(id)?;

        let _turn = self.begin(&student_id).await;
        self.inner
            .commit(Some(&student_id), ChangeKind::Updated, |records| {
                let record = find_mut(records, id)?;
                record.apply(&patch);
                Ok(())
            })
            .await?;
        info!(id, student_id = %student_id, "fee record updated");

        self.inner.sync_student(&student_id).await;
        self.committed(id)
    }

    pub async fn remove(&self, id: &str) -> Result<FeeRecord, LedgerError> {
        let student_id = self.inner.student_of(id)?;

        let _turn = self.begin(&student_id).await;
        let removed = self
            .inner
            .commit(Some(&student_id), ChangeKind::Removed, |records| {
                let index = records
                    .iter()
                    .position(|r| r.id == id)
                    .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
                Ok(records.remove(index))
            })
            .await?;
        info!(id, student_id = %student_id, "fee record removed");

        self.inner.sync_student(&student_id).await;
        Ok(removed)
    }

    pub async fn mark_paid(&self, id: &str, paid_date: NaiveDate) -> Result<FeeRecord, LedgerError> {
        let student_id = self.inner.student_of(id)?;

        let _turn = self.begin(&student_id).await;
        self.inner
            .commit(Some(&student_id), ChangeKind::MarkedPaid, |records| {
                let record = find_mut(records, id)?;
                record.status = FeeStatus::Paid;
                record.paid_date = Some(paid_date);
                Ok(())
            })
            .await?;
        info!(id, student_id = %student_id, %paid_date, "fee record marked paid");

        self.inner.sync_student(&student_id).await;
        self.committed(id)
    }

    /// Move pending records due before `today` to overdue. Returns how many changed.
    pub async fn refresh_overdue(&self, today: NaiveDate) -> Result<usize, LedgerError> {
        let is_late = |r: &FeeRecord| r.status == FeeStatus::Pending && r.due_date < today;
        let any_late = self.inner.read().records.iter().any(is_late);
        if !any_late {
            return Ok(0);
        }

        let changed = self
            .inner
            .commit(None, ChangeKind::OverdueRefreshed, |records| {
                let mut changed = 0;
                for record in records.iter_mut().filter(|r| is_late(r)) {
                    record.status = FeeStatus::Overdue;
                    changed += 1;
                }
                Ok(changed)
            })
            .await?;
        info!(changed, %today, "overdue fee records refreshed");
        Ok(changed)
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&LedgerChange) + Send + Sync + 'static,
    {
        self.inner.subscribers.subscribe(listener)
    }

    pub fn snapshot(&self, student_id: &str) -> StudentSnapshot {
        let state = self.inner.read();
        let records: Vec<FeeRecord> = state
            .records
            .iter()
            .filter(|r| r.student_id == student_id)
            .cloned()
            .collect();
        let pending_sync =
            state.unsynced.contains(student_id) || records.iter().any(FeeRecord::is_pending_sync);
        StudentSnapshot {
            student_id: student_id.to_string(),
            aggregate: recompute_aggregate(&records, student_id),
            records,
            pending_sync,
            version: state.version,
        }
    }

    pub fn summary(&self) -> LedgerSummary {
        let state = self.inner.read();
        let mut by_student: BTreeMap<&str, Vec<&FeeRecord>> = BTreeMap::new();
        for record in &state.records {
            by_student.entry(record.student_id.as_str()).or_default().push(record);
        }

        let students = by_student
            .into_iter()
            .map(|(student_id, records)| {
                // The most recently added record carries the freshest name and section
                let latest = records[records.len() - 1];
                let owned: Vec<FeeRecord> = records.iter().map(|r| (*r).clone()).collect();
                StudentSummary {
                    student_id: student_id.to_string(),
                    student_name: latest.student_name.clone(),
                    section: latest.section.clone(),
                    record_count: owned.len(),
                    aggregate: recompute_aggregate(&owned, student_id),
                    pending_sync: state.unsynced.contains(student_id)
                        || owned.iter().any(FeeRecord::is_pending_sync),
                }
            })
            .collect();

        LedgerSummary {
            students,
            totals: summarize(&state.records),
            version: state.version,
        }
    }

    pub fn record(&self, id: &str) -> Option<FeeRecord> {
        self.inner.read().records.iter().find(|r| r.id == id).cloned()
    }

    pub fn records(&self) -> Vec<FeeRecord> {
        self.inner.read().records.clone()
    }

    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    pub fn has_unsynced_changes(&self) -> bool {
        let state = self.inner.read();
        !state.unsynced.is_empty() || state.records.iter().any(FeeRecord::is_pending_sync)
    }

    pub fn unsynced_students(&self) -> Vec<String> {
        let state = self.inner.read();
        let mut students = state.unsynced.clone();
        students.extend(
            state
                .records
                .iter()
                .filter(|r| r.is_pending_sync())
                .map(|r| r.student_id.clone()),
        );
        students.into_iter().collect()
    }

    /// List students from the backend
    pub async fn students(&self, query: &StudentQuery) -> Result<Vec<Student>, ApiError> {
        self.inner.api.fetch_students(query).await
    }
}

fn find_mut<'a>(records: &'a mut [FeeRecord], id: &str) -> Result<&'a mut FeeRecord, LedgerError> {
    records
        .iter_mut()
        .find(|r| r.id == id)
        .ok_or_else(|| LedgerError::NotFound(id.to_string()))
}
