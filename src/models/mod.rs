mod fee_record;
mod student;

pub use fee_record::{FeeRecord, FeeRecordPatch, FeeStatus, NewFeeRecord, SyncState};
pub use student::{Student, StudentFeeAggregate};
