use serde::Serialize;

use crate::models::{FeeRecord, StudentFeeAggregate};

/// Half a cent
const MONEY_EPSILON: f64 = 0.005;

/// Totals recomputed from a student's fee records
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FeeAggregate {
    pub total: f64,
    pub paid: f64,
    pub balance: f64,
}

impl FeeAggregate {
    /// Server payload, carrying the transport fees the ledger doesn't own
    pub fn to_student_fees(self, transport_fees: f64) -> StudentFeeAggregate {
        StudentFeeAggregate {
            total_fees: self.total,
            paid_fees: self.paid,
            balance_fees: self.balance,
            transport_fees,
        }
    }

    fn from_records<'a>(records: impl Iterator<Item = &'a FeeRecord>) -> Self {
        let (total, paid) = records.fold((0.0, 0.0), |(total, paid), record| {
            let paid_amount = if record.is_paid() { record.amount } else { 0.0 };
            (total + record.amount, paid + paid_amount)
        });
        FeeAggregate {
            total,
            paid,
            balance: total - paid,
        }
    }
}

impl StudentFeeAggregate {
    pub fn agrees_with(&self, aggregate: &FeeAggregate) -> bool {
        (self.total_fees - aggregate.total).abs() < MONEY_EPSILON
            && (self.paid_fees - aggregate.paid).abs() < MONEY_EPSILON
            && (self.balance_fees - aggregate.balance).abs() < MONEY_EPSILON
    }
}

/// Recompute a student's totals from scratch over the full record set
pub fn recompute_aggregate(records: &[FeeRecord], student_id: &str) -> FeeAggregate {
    FeeAggregate::from_records(records.iter().filter(|r| r.student_id == student_id))
}

/// Totals over every record in the ledger
pub fn summarize(records: &[FeeRecord]) -> FeeAggregate {
    FeeAggregate::from_records(records.iter())
}
