//! Task Management
//!
//! Task model, registry, scheduling and result aggregation.

pub mod aggregator;
pub mod model;
pub mod registry;
pub mod scheduler;

pub use aggregator::{ResultAggregator, SUMMARY_VALUE_LIMIT};
pub use model::{TaskId, TaskNode, TaskOutcome, TaskStatus, WorkDescriptor};
pub use registry::{StuckTask, TaskRegistry, TaskStatistics};
pub use scheduler::{SchedulerConfig, SchedulerEvent, TaskExecutor, TaskScheduler};
