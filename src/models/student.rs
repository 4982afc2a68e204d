use serde::{Deserialize, Serialize};

/// Fee totals the backend keeps on the student entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentFeeAggregate {
    #[serde(default)]
    pub total_fees: f64,
    #[serde(default)]
    pub paid_fees: f64,
    #[serde(default)]
    pub balance_fees: f64,
    #[serde(default)]
    pub transport_fees: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default, alias = "student_class")]
    pub section: String,
    #[serde(default)]
    pub fees: StudentFeeAggregate,
}
