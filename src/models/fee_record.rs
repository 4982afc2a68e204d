use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeStatus {
    Pending,
    Paid,
    Overdue,
}

impl FeeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeStatus::Pending => "pending",
            FeeStatus::Paid => "paid",
            FeeStatus::Overdue => "overdue",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(FeeStatus::Pending),
            "paid" => Some(FeeStatus::Paid),
            "overdue" => Some(FeeStatus::Overdue),
            _ => None,
        }
    }
}

/// Whether the student's server aggregate reflects this record yet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    #[default]
    Synced,
    PendingSync,
}

/// One entry of the persisted fee ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeRecord {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    #[serde(default)]
    pub section: String,
    pub fee_type: String,
    pub amount: f64,
    pub due_date: NaiveDate,
    pub status: FeeStatus,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_date: Option<NaiveDate>,
    #[serde(default)]
    pub sync_state: SyncState,
}

impl FeeRecord {
    pub fn is_paid(&self) -> bool {
        self.status == FeeStatus::Paid
    }

    pub fn is_pending_sync(&self) -> bool {
        self.sync_state == SyncState::PendingSync
    }

    /// Apply an already validated patch
    pub fn apply(&mut self, patch: &FeeRecordPatch) {
        if let Some(amount) = patch.amount {
            self.amount = amount;
        }
        if let Some(fee_type) = &patch.fee_type {
            self.fee_type = fee_type.trim().to_string();
        }
        if let Some(section) = &patch.section {
            self.section = section.clone();
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
            if status == FeeStatus::Paid {
                if self.paid_date.is_none() {
                    self.paid_date = Some(chrono::Local::now().date_naive());
                }
            } else {
                self.paid_date = None;
            }
        }
    }
}

/// Input for appending a fee record
#[derive(Debug, Clone, PartialEq)]
pub struct NewFeeRecord {
    pub student_id: String,
    pub student_name: String,
    pub section: String,
    pub fee_type: String,
    pub amount: f64,
    pub due_date: NaiveDate,
    pub description: String,
}

impl NewFeeRecord {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.student_id.trim().is_empty() {
            return Err(LedgerError::Validation("student id must not be empty".into()));
        }
        validate_fee_type(&self.fee_type)?;
        validate_amount(self.amount)
    }

    pub fn into_record(self) -> FeeRecord {
        FeeRecord {
            id: uuid::Uuid::new_v4().to_string(),
            student_id: self.student_id,
            student_name: self.student_name,
            section: self.section,
            fee_type: self.fee_type.trim().to_string(),
            amount: self.amount,
            due_date: self.due_date,
            status: FeeStatus::Pending,
            description: self.description,
            paid_date: None,
            sync_state: SyncState::Synced,
        }
    }
}

/// Partial edit of an existing fee record. The owning student cannot change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeeRecordPatch {
    pub amount: Option<f64>,
    pub fee_type: Option<String>,
    pub section: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub status: Option<FeeStatus>,
}

impl FeeRecordPatch {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if let Some(fee_type) = &self.fee_type {
            validate_fee_type(fee_type)?;
        }
        if let Some(amount) = self.amount {
            validate_amount(amount)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        *self == FeeRecordPatch::default()
    }
}

fn validate_fee_type(fee_type: &str) -> Result<(), LedgerError> {
    if fee_type.trim().is_empty() {
        return Err(LedgerError::Validation("fee type must not be empty".into()));
    }
    Ok(())
}

fn validate_amount(amount: f64) -> Result<(), LedgerError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(LedgerError::Validation(format!(
            "amount must be greater than zero, got {}",
            amount
        )));
    }
    Ok(())
}
