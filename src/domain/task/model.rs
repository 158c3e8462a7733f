//! Task Model
//!
//! Core data structures for task management.

use crate::domain::priority::Priority;
use crate::domain::retry::AgentResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Task identifier
pub type TaskId = Uuid;

/// Terminal value stored for every finished task
pub type TaskOutcome = AgentResult<serde_json::Value>;

/// Task execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Task is waiting to be dispatched
    Pending,
    /// Task is currently running
    Running,
    /// Task completed successfully
    Completed,
    /// Task failed with an error
    Failed,
}

impl TaskStatus {
    /// Check if the task is in a terminal state
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Check if the task is runnable
    #[must_use]
    pub fn is_runnable(&self) -> bool {
        matches!(self, TaskStatus::Pending)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Opaque unit of work, meaningful only to the executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkDescriptor {
    /// Which handler the executor should route to (e.g. "search", "code")
    pub handler: String,
    /// Handler-specific input
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl WorkDescriptor {
    pub fn new(handler: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            handler: handler.into(),
            payload,
        }
    }

    /// Descriptor with a null payload
    pub fn handler(handler: impl Into<String>) -> Self {
        Self::new(handler, serde_json::Value::Null)
    }
}

/// Task node in the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    /// Unique task identifier
    pub id: TaskId,
    /// Dispatch priority
    pub priority: Priority,
    /// Submission order within the owning registry; breaks priority ties
    pub sequence: u64,
    /// Work to hand to the executor
    pub descriptor: WorkDescriptor,
    /// Tasks that must finish before this one may run
    pub dependencies: HashSet<TaskId>,
    /// Current status
    pub status: TaskStatus,
    /// Terminal outcome (once completed or failed)
    pub outcome: Option<TaskOutcome>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Start timestamp (when execution began)
    pub started_at: Option<DateTime<Utc>>,
    /// Completion timestamp
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskNode {
    /// Create a new pending task
    pub fn new(descriptor: WorkDescriptor, priority: Priority, sequence: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            priority,
            sequence,
            descriptor,
            dependencies: HashSet::new(),
            status: TaskStatus::Pending,
            outcome: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Builder: use a caller-chosen id
    #[must_use]
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    /// Builder: set dependencies
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies = dependencies.into_iter().collect();
        self
    }

    /// Ordering key used by the ready index
    #[must_use]
    pub fn ready_key(&self) -> ReadyKey {
        ReadyKey {
            priority: self.priority,
            sequence: self.sequence,
            id: self.id,
        }
    }

    /// Pending with every dependency satisfied
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status.is_runnable() && self.dependencies.is_empty()
    }

    /// Mark task as running
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Record the terminal outcome
    pub fn complete(&mut self, outcome: TaskOutcome) {
        self.status = if outcome.is_success() {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        self.outcome = Some(outcome);
        self.completed_at = Some(Utc::now());
    }

    /// Get execution duration in milliseconds
    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => {
                let duration = end.signed_duration_since(start);
                Some(duration.num_milliseconds().max(0) as u64)
            }
            (Some(start), None) => {
                let duration = Utc::now().signed_duration_since(start);
                Some(duration.num_milliseconds().max(0) as u64)
            }
            _ => None,
        }
    }
}

/// Ready-index key: (priority, submission order), id only to keep keys unique
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReadyKey {
    pub priority: Priority,
    pub sequence: u64,
    pub id: TaskId,
}
