use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{StudentApi, StudentQuery};
use crate::error::ApiError;
use crate::models::{Student, StudentFeeAggregate};

#[derive(Default)]
struct FakeState {
    students: BTreeMap<String, Student>,
    patches: Vec<(String, StudentFeeAggregate)>,
    failing_patches: usize,
    failing_fetches: usize,
    patch_delay: Option<Duration>,
}

/// In-memory stand-in for the school backend.
///
/// Every accepted PATCH is recorded in order. Failures can be queued for the
/// next N patches or fetches, and patches can be slowed down to exercise
/// cancellation.
#[derive(Default)]
pub struct FakeStudentApi {
    state: Mutex<FakeState>,
}

impl FakeStudentApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_students(students: impl IntoIterator<Item = Student>) -> Self {
        let api = Self::new();
        for student in students {
            api.put_student(student);
        }
        api
    }

    pub fn put_student(&self, student: Student) {
        self.lock().students.insert(student.id.clone(), student);
    }

    /// Overwrite the server copy of a student's fees without going through PATCH
    pub fn set_fees(&self, student_id: &str, fees: StudentFeeAggregate) {
        let mut state = self.lock();
        let student = state
            .students
            .entry(student_id.to_string())
            .or_insert_with(|| Student {
                id: student_id.to_string(),
                name: student_id.to_string(),
                section: String::new(),
                fees: StudentFeeAggregate::default(),
            });
        student.fees = fees;
    }

    pub fn fees(&self, student_id: &str) -> Option<StudentFeeAggregate> {
        self.lock().students.get(student_id).map(|s| s.fees)
    }

    pub fn fail_next_patches(&self, count: usize) {
        self.lock().failing_patches = count;
    }

    pub fn fail_next_fetches(&self, count: usize) {
        self.lock().failing_fetches = count;
    }

    pub fn set_patch_delay(&self, delay: Option<Duration>) {
        self.lock().patch_delay = delay;
    }

    /// Accepted patches, oldest first
    pub fn patches(&self) -> Vec<(String, StudentFeeAggregate)> {
        self.lock().patches.clone()
    }

    pub fn patch_count(&self) -> usize {
        self.lock().patches.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StudentApi for FakeStudentApi {
    async fn fetch_students(&self, query: &StudentQuery) -> Result<Vec<Student>, ApiError> {
        let mut state = self.lock();
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(ApiError::Injected("fetch failed".into()));
        }

        let search = query.search.as_deref().map(str::to_lowercase);
        let students = state
            .students
            .values()
            .filter(|s| query.id.as_deref().is_none_or(|id| s.id == id))
            .filter(|s| query.section.as_deref().is_none_or(|section| s.section == section))
            .filter(|s| {
                search
                    .as_deref()
                    .is_none_or(|needle| s.name.to_lowercase().contains(needle))
            })
            .cloned()
            .collect();
        Ok(students)
    }

    async fn patch_student_fees(
        &self,
        student_id: &str,
        fees: &StudentFeeAggregate,
    ) -> Result<(), ApiError> {
        let delay = {
            let mut state = self.lock();
            if state.failing_patches > 0 {
                state.failing_patches -= 1;
                return Err(ApiError::Injected("patch failed".into()));
            }
            state.patch_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.set_fees(student_id, *fees);
        self.lock().patches.push((student_id.to_string(), *fees));
        Ok(())
    }
}
