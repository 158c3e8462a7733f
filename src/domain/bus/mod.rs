//! Message Bus
//!
//! Topic-based publish/subscribe with targeted commands and request/reply.

pub mod message;
pub mod message_bus;

pub use message::{Message, MessageType};
pub use message_bus::{
    BusConfig, HistoryFilter, MessageBus, MessageHandler, Target, WILDCARD_TOPIC,
};
