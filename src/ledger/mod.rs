//! The client-side fee ledger.
//!
//! [`LedgerStore`] owns every fee record, persists the whole set through a
//! [`LedgerStorage`](crate::storage::LedgerStorage) and mirrors each student's
//! recomputed totals onto the backend. Views read it through
//! [`LedgerStore::snapshot`] and learn about changes with
//! [`LedgerStore::subscribe`].

mod aggregate;
mod queue;
mod reconcile;
mod store;
mod subscription;
mod sync;

pub use aggregate::{recompute_aggregate, summarize, FeeAggregate};
pub use queue::{StudentQueue, StudentTurn};
pub use reconcile::{ReconcileOutcome, ReconcileReport};
pub use store::{
    LedgerOptions, LedgerStore, LedgerSummary, StudentSnapshot, StudentSummary,
    DEFAULT_LEDGER_KEY,
};
pub use subscription::{ChangeKind, LedgerChange, Subscribers, Subscription};
pub use sync::{BackoffPolicy, RetryPolicy, RetryTasks};
