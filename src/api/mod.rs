//! Client side of the school backend's student endpoints.

mod fake;
mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::{Student, StudentFeeAggregate};

pub use fake::FakeStudentApi;
pub use http::HttpStudentApi;

/// Filters for `GET /student/fetch-with-query`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StudentQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl StudentQuery {
    pub fn by_id(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Self::default()
        }
    }
}

/// Body of `PATCH /student/update/:id` when only fees change
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeesPatch {
    pub fees: StudentFeeAggregate,
}

#[async_trait]
pub trait StudentApi: Send + Sync {
    async fn fetch_students(&self, query: &StudentQuery) -> Result<Vec<Student>, ApiError>;

    /// Server-held fee aggregate of one student
    async fn fetch_student_fees(&self, student_id: &str) -> Result<StudentFeeAggregate, ApiError> {
        self.fetch_students(&StudentQuery::by_id(student_id))
            .await?
            .into_iter()
            .find(|s| s.id == student_id)
            .map(|s| s.fees)
            .ok_or_else(|| ApiError::NotFound(student_id.to_string()))
    }

    /// Overwrite the student's fee aggregate. Values are absolute, so repeating the call is safe.
    async fn patch_student_fees(
        &self,
        student_id: &str,
        fees: &StudentFeeAggregate,
    ) -> Result<(), ApiError>;
}
