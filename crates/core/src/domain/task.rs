// Task Domain Model

use serde::{Deserialize, Serialize};

/// Task ID (UUID v4)
pub type TaskId = String;

/// Task payload handed to the office connection (JSON serializable)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload(serde_json::Value);

impl TaskPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Result returned by the office connection for one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput(serde_json::Value);

impl TaskOutput {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

/// A unit of conversion work; immutable after submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub payload: TaskPayload,
    pub submitted_at: i64,     // epoch ms
    pub deadline: Option<i64>, // epoch ms, caps the queue wait
}

impl Task {
    /// Create a new task
    ///
    /// # Arguments
    ///
    /// * `id` - Unique task ID (injected, not generated)
    /// * `submitted_at` - Submission timestamp in epoch ms (injected, not system time)
    /// * `payload` - Task payload
    pub fn new(id: impl Into<String>, submitted_at: i64, payload: TaskPayload) -> Self {
        Self {
            id: id.into(),
            payload,
            submitted_at,
            deadline: None,
        }
    }

    /// Set an absolute deadline (epoch ms)
    pub fn with_deadline(mut self, deadline: i64) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Milliseconds left before the deadline, if one is set
    pub fn remaining_ms(&self, now_millis: i64) -> Option<i64> {
        self.deadline.map(|d| (d - now_millis).max(0))
    }

    /// Create a test task with deterministic ID and timestamp.
    ///
    /// **Note**: This method should only be used in tests. For production code,
    /// always inject ID and time via providers.
    pub fn new_test(payload: serde_json::Value) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        Self::new(
            format!("task-{}", counter),
            (counter * 1000) as i64,
            TaskPayload::new(payload),
        )
    }
}
