//! `Taskweave` Error Types
//!
//! Centralized error handling using thiserror for type-safe errors.

use thiserror::Error;
use uuid::Uuid;

/// Type-erased failure raised by an operation, executor or message handler.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Top-level error type for `Taskweave`
#[derive(Error, Debug)]
pub enum TaskweaveError {
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Message bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Task registry and scheduler errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task '{id}' not found")]
    NotFound { id: Uuid },

    #[error("Invalid task state transition for '{id}': {from} -> {to}")]
    InvalidStateTransition { id: Uuid, from: String, to: String },

    #[error("Task '{id}' already exists")]
    AlreadyExists { id: Uuid },

    #[error("Result for task '{id}' already recorded")]
    AlreadyRecorded { id: Uuid },

    #[error("Scheduler is closed to new submissions")]
    SchedulerClosed,

    #[error("Dependency cycle detected among tasks: {tasks:?}")]
    DependencyCycle { tasks: Vec<Uuid> },

    #[error("Task '{task_id}' depends on unknown task '{dep_id}'")]
    MissingDependency { task_id: Uuid, dep_id: Uuid },

    #[error("Task '{task_id}' waits on '{via}', which depends on unknown task '{dep_id}'")]
    UnresolvableDependency {
        task_id: Uuid,
        via: Uuid,
        dep_id: Uuid,
    },
}

/// Message bus errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Message bus has been shut down")]
    Closed,

    #[error("Subscriber '{subscriber_id}' gave no topics to subscribe to")]
    EmptySubscription { subscriber_id: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias for `Taskweave` operations
pub type Result<T> = std::result::Result<T, TaskweaveError>;

/// Result type alias for Task operations
pub type TaskResult<T> = std::result::Result<T, TaskError>;

/// Result type alias for message bus operations
pub type BusResult<T> = std::result::Result<T, BusError>;

/// Result type alias for Config operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
