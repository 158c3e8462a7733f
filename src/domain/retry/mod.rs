//! Retry and Outcome Handling
//!
//! Structured results, error classification, and the retry policy.

pub mod classifier;
pub mod policy;
pub mod result;

pub use classifier::{classify, classify_error};
pub use policy::{RetryPolicy, RetryStrategy};
pub use result::{AgentResult, ConfidenceLevel, ErrorCategory};
