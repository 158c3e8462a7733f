//! Bus messages

use crate::domain::priority::Priority;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Communication pattern a message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Direct instruction to a subscriber
    Command,
    /// Request for information, answered by a `Response`
    Query,
    Response,
    /// Notification of an occurrence
    #[default]
    Event,
    /// Delivered to every subscriber when nobody holds the topic
    Broadcast,
    Heartbeat,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::Command => write!(f, "command"),
            MessageType::Query => write!(f, "query"),
            MessageType::Response => write!(f, "response"),
            MessageType::Event => write!(f, "event"),
            MessageType::Broadcast => write!(f, "broadcast"),
            MessageType::Heartbeat => write!(f, "heartbeat"),
        }
    }
}

/// A message carried by the [`MessageBus`](super::MessageBus)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub message_type: MessageType,
    /// Informational only; delivery order does not depend on it
    pub priority: Priority,
    pub sender: String,
    /// Explicit recipients; when non-empty the topic index is bypassed
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub topic: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub subject: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Topic a response should be published on
    #[serde(default)]
    pub reply_to: Option<String>,
    /// Id of the message this one answers
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(
        message_type: MessageType,
        sender: impl Into<String>,
        subject: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_type,
            priority: Priority::default(),
            sender: sender.into(),
            recipients: Vec::new(),
            topic: None,
            timestamp: Utc::now(),
            subject: subject.into(),
            payload,
            reply_to: None,
            correlation_id: None,
            expires_at: None,
        }
    }

    /// Event on a topic
    pub fn event(
        topic: impl Into<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(MessageType::Event, sender, subject, payload).with_topic(topic)
    }

    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    #[must_use]
    pub fn with_recipients<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recipients = recipients.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Expire `ttl` from now. A TTL too large to represent never expires.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl));
        self
    }

    /// Build the response to this message.
    ///
    /// The response goes to `reply_to` when set, otherwise straight back to
    /// the original sender, and carries this message's id as its
    /// correlation id.
    pub fn reply(
        &self,
        sender: impl Into<String>,
        subject: impl Into<String>,
        payload: serde_json::Value,
    ) -> Message {
        let mut response = Message::new(MessageType::Response, sender, subject, payload);
        response.priority = self.priority;
        response.correlation_id = Some(self.id);
        match self.reply_to {
            Some(ref topic) => response.topic = Some(topic.clone()),
            None => response.recipients = vec![self.sender.clone()],
        }
        response
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_builder() {
        let msg = Message::event("builds", "ci", "finished", json!({"ok": true}))
            .with_priority(Priority::High);
        assert_eq!(msg.message_type, MessageType::Event);
        assert_eq!(msg.topic.as_deref(), Some("builds"));
        assert_eq!(msg.priority, Priority::High);
        assert!(msg.recipients.is_empty());
        assert!(!msg.is_expired());
    }

    #[test]
    fn test_reply_uses_reply_topic() {
        let mut query = Message::new(MessageType::Query, "planner", "status?", json!(null));
        query.reply_to = Some(format!("response.{}", query.id));

        let response = query.reply("worker", "status", json!("idle"));
        assert_eq!(response.message_type, MessageType::Response);
        assert_eq!(response.topic, query.reply_to);
        assert_eq!(response.correlation_id, Some(query.id));
        assert!(response.recipients.is_empty());
    }

    #[test]
    fn test_reply_without_topic_goes_to_sender() {
        let command = Message::new(MessageType::Command, "planner", "run", json!(null));
        let response = command.reply("worker", "done", json!(null));
        assert_eq!(response.recipients, vec!["planner".to_string()]);
        assert!(response.topic.is_none());
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let msg = Message::event("t", "s", "x", json!(null))
            .with_expiry(now - chrono::Duration::seconds(1));
        assert!(msg.is_expired());
        assert!(!msg.is_expired_at(now - chrono::Duration::seconds(2)));

        let fresh = Message::event("t", "s", "x", json!(null)).with_ttl(Duration::from_secs(60));
        assert!(!fresh.is_expired());
        assert!(fresh.expires_at.is_some());
    }

    #[test]
    fn test_json_shape() {
        let msg = Message::new(MessageType::Broadcast, "system", "shutdown", json!({"in": 5}))
            .with_recipients(["a", "b"]);
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["message_type"], "broadcast");
        assert_eq!(value["priority"], "medium");
        assert_eq!(value["recipients"], json!(["a", "b"]));

        let parsed = Message::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(parsed, msg);
    }
}
