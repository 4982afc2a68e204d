use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-student FIFO lock. Holders for one student run one at a time; other
/// students are unaffected.
#[derive(Default)]
pub struct StudentQueue {
    lanes: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held for the whole of one student's mutation, including its server write
pub type StudentTurn = OwnedMutexGuard<()>;

impl StudentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, student_id: &str) -> StudentTurn {
        let lane = {
            let mut lanes = self.lanes.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(lanes.entry(student_id.to_string()).or_default())
        };
        lane.lock_owned().await
    }
}
