use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use tracing::debug;

use super::{FeesPatch, StudentApi, StudentQuery};
use crate::error::ApiError;
use crate::models::{Student, StudentFeeAggregate};

/// Student listings come back bare or wrapped depending on the backend build
#[derive(Deserialize)]
#[serde(untagged)]
enum StudentsEnvelope {
    Bare(Vec<Student>),
    Students { students: Vec<Student> },
    Data { data: Vec<Student> },
}

impl StudentsEnvelope {
    fn into_students(self) -> Vec<Student> {
        match self {
            StudentsEnvelope::Bare(students)
            | StudentsEnvelope::Students { students }
            | StudentsEnvelope::Data { data: students } => students,
        }
    }
}

pub struct HttpStudentApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpStudentApi {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl StudentApi for HttpStudentApi {
    async fn fetch_students(&self, query: &StudentQuery) -> Result<Vec<Student>, ApiError> {
        let url = format!("{}/student/fetch-with-query", self.base_url);
        let request = self.authorize(self.client.get(&url).query(query));
        let response = Self::check(request.send().await?).await?;
        let envelope: StudentsEnvelope = response.json().await?;
        let students = envelope.into_students();
        debug!(count = students.len(), "fetched students");
        Ok(students)
    }

    async fn patch_student_fees(
        &self,
        student_id: &str,
        fees: &StudentFeeAggregate,
    ) -> Result<(), ApiError> {
        let url = format!("{}/student/update/{}", self.base_url, student_id);
        let body = FeesPatch { fees: *fees };
        let request = self.authorize(self.client.patch(&url).json(&body));
        Self::check(request.send().await?).await?;
        debug!(student_id, total = fees.total_fees, "patched student fees");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_every_listing_shape() {
        let student = r#"{"_id":"S1","name":"Asha","section":"A","fees":{"total_fees":700,"paid_fees":200,"balance_fees":500,"transport_fees":50}}"#;
        for body in [
            format!("[{}]", student),
            format!(r#"{{"students":[{}]}}"#, student),
            format!(r#"{{"data":[{}]}}"#, student),
        ] {
            let envelope: StudentsEnvelope = serde_json::from_str(&body).unwrap();
            let students = envelope.into_students();
            assert_eq!(students.len(), 1);
            assert_eq!(students[0].id, "S1");
            assert_eq!(students[0].fees.transport_fees, 50.0);
        }
    }

    #[test]
    fn patch_body_nests_fees() {
        let body = FeesPatch {
            fees: StudentFeeAggregate {
                total_fees: 700.0,
                paid_fees: 200.0,
                balance_fees: 500.0,
                transport_fees: 0.0,
            },
        };
        let value = serde_json::to_value(body).unwrap();
        assert_eq!(value["fees"]["balance_fees"], 500.0);
        assert_eq!(value["fees"]["transport_fees"], 0.0);
    }

    #[test]
    fn base_url_loses_trailing_slash() {
        let api = HttpStudentApi::new("http://localhost:4000/api/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(api.base_url(), "http://localhost:4000/api");
    }
}
