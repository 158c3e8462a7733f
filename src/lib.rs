//! Taskweave Library
//!
//! In-process coordination of asynchronous work:
//! - Priority and dependency aware task scheduling with bounded concurrency
//! - A uniform retry contract with error classification
//! - A topic-based message bus with request/reply

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;

pub use config::AppConfig;
pub use domain::bus::{BusConfig, Message, MessageBus, MessageHandler, MessageType, Target};
pub use domain::retry::{
    classify, classify_error, AgentResult, ConfidenceLevel, ErrorCategory, RetryPolicy,
    RetryStrategy,
};
pub use domain::task::{
    SchedulerConfig, SchedulerEvent, TaskExecutor, TaskId, TaskOutcome, TaskScheduler,
    TaskStatus, WorkDescriptor,
};
pub use domain::Priority;
pub use error::{BoxError, Result, TaskweaveError};
