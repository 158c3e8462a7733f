//! Domain Layer
//!
//! Task scheduling, retry handling and the message bus.

pub mod bus;
pub mod priority;
pub mod retry;
pub mod task;

pub use priority::Priority;
