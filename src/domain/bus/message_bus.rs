//! Message Bus
//!
//! Topic registry plus delivery engine. Handlers are looked up under the
//! state lock and invoked after it is released, so a handler may publish,
//! subscribe or unsubscribe on the same bus.

use super::message::{Message, MessageType};
use crate::config::duration_secs;
use crate::domain::priority::Priority;
use crate::error::{BoxError, BusError, BusResult};
use async_trait::async_trait;
use futures::future::{join_all, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Topic that matches any message addressed to a subscriber
pub const WILDCARD_TOPIC: &str = "*";

/// Receives messages for a subscriber
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Result<(), BoxError>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn handle(&self, message: Message) -> Result<(), BoxError> {
        (self)(message).await
    }
}

/// Bus configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Messages kept for [`MessageBus::history`]
    pub history_capacity: usize,
    /// Timeout suggested for requests
    #[serde(rename = "request_timeout_secs", with = "duration_secs")]
    pub request_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Where a query is addressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Topic(String),
    Recipient(String),
}

/// History query. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub topic: Option<String>,
    pub sender: Option<String>,
    pub message_type: Option<MessageType>,
}

impl HistoryFilter {
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    #[must_use]
    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    #[must_use]
    pub fn message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = Some(message_type);
        self
    }

    fn matches(&self, message: &Message) -> bool {
        self.topic
            .as_ref()
            .map_or(true, |topic| message.topic.as_ref() == Some(topic))
            && self
                .sender
                .as_ref()
                .map_or(true, |sender| &message.sender == sender)
            && self
                .message_type
                .map_or(true, |message_type| message.message_type == message_type)
    }
}

type SharedHandler = Arc<dyn MessageHandler>;

#[derive(Default)]
struct BusState {
    /// topic -> subscriber ids
    topics: HashMap<String, HashSet<String>>,
    /// subscriber id -> topic -> handler
    subscribers: HashMap<String, HashMap<String, SharedHandler>>,
    history: VecDeque<Message>,
    closed: bool,
}

impl BusState {
    fn remove_topic(&mut self, subscriber_id: &str, topic: &str) {
        if let Some(handlers) = self.subscribers.get_mut(subscriber_id) {
            handlers.remove(topic);
            if handlers.is_empty() {
                self.subscribers.remove(subscriber_id);
            }
        }
        if let Some(members) = self.topics.get_mut(topic) {
            members.remove(subscriber_id);
            if members.is_empty() {
                self.topics.remove(topic);
            }
        }
    }

    fn resolve_recipients(&self, message: &Message) -> Vec<String> {
        if !message.recipients.is_empty() {
            let mut seen = HashSet::new();
            return message
                .recipients
                .iter()
                .filter(|id| seen.insert(id.as_str()))
                .cloned()
                .collect();
        }

        let by_topic: Vec<String> = message
            .topic
            .as_deref()
            .and_then(|topic| self.topics.get(topic))
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default();

        if by_topic.is_empty() && message.message_type == MessageType::Broadcast {
            return self.subscribers.keys().cloned().collect();
        }
        by_topic
    }

    /// Topic handler, falling back to the subscriber's wildcard handler
    fn handler_for(&self, subscriber_id: &str, topic: Option<&str>) -> Option<SharedHandler> {
        let handlers = self.subscribers.get(subscriber_id)?;
        topic
            .and_then(|topic| handlers.get(topic))
            .or_else(|| handlers.get(WILDCARD_TOPIC))
            .cloned()
    }

    fn push_history(&mut self, message: Message, capacity: usize) {
        if capacity == 0 {
            return;
        }
        while self.history.len() >= capacity {
            self.history.pop_front();
        }
        self.history.push_back(message);
    }
}

/// Publish/subscribe bus with request/reply on top
pub struct MessageBus {
    state: Mutex<BusState>,
    config: BusConfig,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MessageBus")
            .field("config", &self.config)
            .field("subscribers", &state.subscribers.len())
            .field("topics", &state.topics.len())
            .field("history", &state.history.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl MessageBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            config,
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Configured default for [`request`](Self::request)
    pub fn default_timeout(&self) -> Duration {
        self.config.request_timeout
    }

    // handlers never run under the lock, so a poisoned guard still holds
    // consistent indices
    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handler` for each topic, replacing any handler this
    /// subscriber already had for the same topic.
    pub fn subscribe<I, S>(
        &self,
        subscriber_id: impl Into<String>,
        topics: I,
        handler: impl MessageHandler + 'static,
    ) -> BusResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let subscriber_id = subscriber_id.into();
        let topics: Vec<String> = topics.into_iter().map(Into::into).collect();
        if topics.is_empty() {
            return Err(BusError::EmptySubscription { subscriber_id });
        }

        let handler: SharedHandler = Arc::new(handler);
        let mut state = self.lock();
        if state.closed {
            return Err(BusError::Closed);
        }

        for topic in topics {
            tracing::debug!(subscriber = %subscriber_id, topic = %topic, "Subscribed");
            state
                .topics
                .entry(topic.clone())
                .or_default()
                .insert(subscriber_id.clone());
            state
                .subscribers
                .entry(subscriber_id.clone())
                .or_default()
                .insert(topic, Arc::clone(&handler));
        }
        Ok(())
    }

    /// Remove every registration of a subscriber
    pub fn unsubscribe(&self, subscriber_id: &str) {
        let mut state = self.lock();
        let topics: Vec<String> = state
            .subscribers
            .get(subscriber_id)
            .map(|handlers| handlers.keys().cloned().collect())
            .unwrap_or_default();
        for topic in &topics {
            state.remove_topic(subscriber_id, topic);
        }
        if !topics.is_empty() {
            tracing::debug!(subscriber = %subscriber_id, topics = topics.len(), "Unsubscribed");
        }
    }

    /// Remove some topics. The subscriber disappears once it has none left.
    pub fn unsubscribe_from<I, S>(&self, subscriber_id: &str, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.lock();
        for topic in topics {
            state.remove_topic(subscriber_id, topic.as_ref());
        }
    }

    /// Deliver a message to every resolved recipient and return how many
    /// handlers were invoked.
    ///
    /// Recipients are the explicit list when given, else the topic's
    /// subscribers, else (for broadcasts only) every subscriber. Expired
    /// messages are dropped and never recorded. Handler failures are
    /// logged and do not affect other recipients.
    pub async fn publish(&self, message: Message) -> BusResult<usize> {
        if message.is_expired() {
            tracing::warn!(message_id = %message.id, "Message expired, not publishing");
            self.ensure_open()?;
            return Ok(0);
        }

        let deliveries: Vec<(String, SharedHandler)> = {
            let mut state = self.lock();
            if state.closed {
                return Err(BusError::Closed);
            }
            let recipients = state.resolve_recipients(&message);
            state.push_history(message.clone(), self.config.history_capacity);

            recipients
                .into_iter()
                .filter_map(|id| {
                    let handler = state.handler_for(&id, message.topic.as_deref());
                    if handler.is_none() {
                        tracing::debug!(subscriber = %id, "No handler for message, skipping");
                    }
                    handler.map(|handler| (id, handler))
                })
                .collect()
        };

        tracing::trace!(
            message_id = %message.id,
            topic = message.topic.as_deref().unwrap_or(""),
            recipients = deliveries.len(),
            "Publishing message"
        );

        let count = deliveries.len();
        join_all(deliveries.into_iter().map(|(subscriber, handler)| {
            let message = message.clone();
            async move {
                match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::error!(subscriber = %subscriber, error = %e, "Handler failed");
                    }
                    Err(_) => {
                        tracing::error!(subscriber = %subscriber, "Handler panicked");
                    }
                }
            }
        }))
        .await;

        Ok(count)
    }

    /// Publish `message` as a query and wait for the first response on its
    /// reply topic.
    ///
    /// Returns `Ok(None)` when nothing answers within `timeout`. The deadline
    /// covers delivery of the query too, so a slow handler on the request
    /// topic cannot stretch the call past it. The
    /// ephemeral reply subscription is removed on every exit path,
    /// including when the returned future is dropped.
    pub async fn request(
        &self,
        mut message: Message,
        timeout: Duration,
    ) -> BusResult<Option<Message>> {
        message.message_type = MessageType::Query;
        let reply_topic = format!("response.{}", message.id);
        let temp_id = format!("temp.{}", Uuid::new_v4());

        let (tx, rx) = oneshot::channel::<Message>();
        let slot = Arc::new(Mutex::new(Some(tx)));
        self.subscribe(temp_id.clone(), [reply_topic.clone()], move |response: Message| {
            let slot = Arc::clone(&slot);
            async move {
                let sender = slot
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(sender) = sender {
                    let _ = sender.send(response);
                }
                Ok::<(), BoxError>(())
            }
        })?;
        let _guard = EphemeralSubscription {
            bus: self,
            subscriber_id: temp_id,
        };

        let message_id = message.id;
        message.reply_to = Some(reply_topic);
        let exchange = async {
            self.publish(message).await?;
            Ok::<_, BusError>(rx.await.ok())
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(message_id = %message_id, timeout_ms = timeout.as_millis() as u64, "Request timed out");
                Ok(None)
            }
        }
    }

    /// Broadcast an event on a topic
    pub async fn broadcast_event(
        &self,
        topic: impl Into<String>,
        subject: impl Into<String>,
        payload: serde_json::Value,
        sender: impl Into<String>,
    ) -> BusResult<usize> {
        let message =
            Message::new(MessageType::Broadcast, sender, subject, payload).with_topic(topic);
        self.publish(message).await
    }

    /// Send a command to one subscriber
    pub async fn send_command(
        &self,
        recipient: impl Into<String>,
        command: impl Into<String>,
        payload: serde_json::Value,
        sender: impl Into<String>,
        priority: Priority,
    ) -> BusResult<usize> {
        let message = Message::new(MessageType::Command, sender, command, payload)
            .with_recipients([recipient.into()])
            .with_priority(priority);
        self.publish(message).await
    }

    /// Ask a topic or a subscriber and wait for the answer
    pub async fn query(
        &self,
        target: Target,
        subject: impl Into<String>,
        payload: serde_json::Value,
        sender: impl Into<String>,
        timeout: Duration,
    ) -> BusResult<Option<Message>> {
        let message = Message::new(MessageType::Query, sender, subject, payload);
        let message = match target {
            Target::Topic(topic) => message.with_topic(topic),
            Target::Recipient(recipient) => message.with_recipients([recipient]),
        };
        self.request(message, timeout).await
    }

    /// Most recent matching messages, newest first
    pub fn history(&self, filter: &HistoryFilter, limit: usize) -> Vec<Message> {
        self.lock()
            .history
            .iter()
            .rev()
            .filter(|message| filter.matches(message))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }

    /// Number of known subscribers
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Sorted ids of every subscriber
    pub fn subscribers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().subscribers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Sorted ids of the subscribers of one topic
    pub fn topic_subscribers(&self, topic: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock()
            .topics
            .get(topic)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn is_subscribed(&self, subscriber_id: &str, topic: &str) -> bool {
        self.lock()
            .subscribers
            .get(subscriber_id)
            .is_some_and(|handlers| handlers.contains_key(topic))
    }

    /// Drop every subscription and refuse further traffic. History is kept.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.topics.clear();
        state.subscribers.clear();
        tracing::info!("Message bus shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn ensure_open(&self) -> BusResult<()> {
        if self.lock().closed {
            Err(BusError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Unsubscribes the request's reply listener when dropped
struct EphemeralSubscription<'a> {
    bus: &'a MessageBus,
    subscriber_id: String,
}

impl Drop for EphemeralSubscription<'_> {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.subscriber_id);
    }
}
