use chrono::NaiveDate;
use crossterm::event::KeyCode;
use tui::{backend::Backend, Frame};

use crate::models::{FeeRecord, FeeRecordPatch, FeeStatus, NewFeeRecord};
use crate::ui::form::{self, FieldKind, FieldSpec, FormAction, FormState, FormValues};

pub const FEE_TYPES: &[&str] = &[
    "Tuition",
    "Transport",
    "Admission",
    "Examination",
    "Library",
    "Laboratory",
    "Sports",
    "Other",
];

const STATUSES: &[&str] = &["pending", "paid", "overdue"];

const FEE_TYPE: FieldSpec = FieldSpec {
    key: "fee_type",
    label: "Fee Type",
    kind: FieldKind::Choice(FEE_TYPES),
    required: true,
};
const AMOUNT: FieldSpec = FieldSpec {
    key: "amount",
    label: "Amount",
    kind: FieldKind::Amount,
    required: true,
};
const DUE_DATE: FieldSpec = FieldSpec {
    key: "due_date",
    label: "Due Date",
    kind: FieldKind::Date,
    required: true,
};
const SECTION: FieldSpec = FieldSpec {
    key: "section",
    label: "Section",
    kind: FieldKind::Text,
    required: false,
};
const DESCRIPTION: FieldSpec = FieldSpec {
    key: "description",
    label: "Description",
    kind: FieldKind::Text,
    required: false,
};
const STATUS: FieldSpec = FieldSpec {
    key: "status",
    label: "Status",
    kind: FieldKind::Choice(STATUSES),
    required: true,
};

/// Fields when adding a fee; new fees always start pending
pub const NEW_FEE_FIELDS: &[FieldSpec] = &[FEE_TYPE, AMOUNT, DUE_DATE, SECTION, DESCRIPTION];

/// Fields when editing an existing fee
pub const EDIT_FEE_FIELDS: &[FieldSpec] = &[FEE_TYPE, AMOUNT, DUE_DATE, SECTION, DESCRIPTION, STATUS];

pub enum FeeFormAction {
    Cancel,
    Create(NewFeeRecord),
    Update(String, FeeRecordPatch),
}

pub struct FeeFormState {
    student_id: String,
    student_name: String,
    record_id: Option<String>,
    form: FormState,
}

impl FeeFormState {
    pub fn new(student_id: &str, student_name: &str, section: &str, today: NaiveDate) -> Self {
        let form = FormState::new(format!("New fee for {}", student_name), NEW_FEE_FIELDS)
            .with_value("due_date", today.format("%Y-%m-%d").to_string())
            .with_value("section", section);
        Self {
            student_id: student_id.to_string(),
            student_name: student_name.to_string(),
            record_id: None,
            form,
        }
    }

    pub fn from_existing(record: &FeeRecord) -> Self {
        let form = FormState::new(format!("Edit fee for {}", record.student_name), EDIT_FEE_FIELDS)
            .with_value("fee_type", record.fee_type.as_str())
            .with_value("amount", format!("{:.2}", record.amount))
            .with_value("due_date", record.due_date.format("%Y-%m-%d").to_string())
            .with_value("section", record.section.as_str())
            .with_value("description", record.description.as_str())
            .with_value("status", record.status.as_str());
        Self {
            student_id: record.student_id.clone(),
            student_name: record.student_name.clone(),
            record_id: Some(record.id.clone()),
            form,
        }
    }

    pub fn student_id(&self) -> &str {
        &self.student_id
    }

    pub fn is_edit(&self) -> bool {
        self.record_id.is_some()
    }

    pub fn form(&self) -> &FormState {
        &self.form
    }

    fn to_action(&self, values: &FormValues) -> Option<FeeFormAction> {
        let fee_type = values.text("fee_type")?.to_string();
        let amount = values.amount("amount")?;
        let due_date = values.date("due_date")?;
        let section = values.text("section").unwrap_or_default().to_string();
        let description = values.text("description").unwrap_or_default().to_string();

        match &self.record_id {
            None => Some(FeeFormAction::Create(NewFeeRecord {
                student_id: self.student_id.clone(),
                student_name: self.student_name.clone(),
                section,
                fee_type,
                amount,
                due_date,
                description,
            })),
            Some(id) => Some(FeeFormAction::Update(
                id.clone(),
                FeeRecordPatch {
                    amount: Some(amount),
                    fee_type: Some(fee_type),
                    section: Some(section),
                    due_date: Some(due_date),
                    description: Some(description),
                    status: values.text("status").and_then(FeeStatus::parse),
                },
            )),
        }
    }
}

pub fn render_fee_form<B: Backend>(f: &mut Frame<B>, state: &FeeFormState) {
    form::render_form(f, &state.form);
}

pub fn handle_input(state: &mut FeeFormState, key: KeyCode) -> Option<FeeFormAction> {
    match form::handle_input(&mut state.form, key)? {
        FormAction::Cancel => Some(FeeFormAction::Cancel),
        FormAction::Submit(values) => state.to_action(&values),
    }
}
