//! Result Aggregator
//!
//! Append-only store of terminal task outcomes.

use super::model::{TaskId, TaskOutcome};
use crate::error::{TaskError, TaskResult};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Display cap for values in [`ResultAggregator::summary`]
pub const SUMMARY_VALUE_LIMIT: usize = 100;

#[derive(Debug, Default)]
struct Entries {
    order: Vec<TaskId>,
    outcomes: HashMap<TaskId, TaskOutcome>,
}

/// Keyed store of finished task outcomes
#[derive(Debug, Default)]
pub struct ResultAggregator {
    entries: RwLock<Entries>,
}

impl ResultAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an outcome. Each task may be recorded once.
    pub async fn record(&self, task_id: TaskId, outcome: TaskOutcome) -> TaskResult<()> {
        let mut entries = self.entries.write().await;
        if entries.outcomes.contains_key(&task_id) {
            return Err(TaskError::AlreadyRecorded { id: task_id });
        }
        entries.order.push(task_id);
        entries.outcomes.insert(task_id, outcome);
        Ok(())
    }

    /// Outcome for one task
    pub async fn get(&self, task_id: &TaskId) -> Option<TaskOutcome> {
        self.entries.read().await.outcomes.get(task_id).cloned()
    }

    /// Copy of every recorded outcome
    pub async fn snapshot(&self) -> HashMap<TaskId, TaskOutcome> {
        self.entries.read().await.outcomes.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.order.is_empty()
    }

    /// Human-readable listing in completion order. Long values are
    /// truncated here only; stored outcomes are never touched.
    pub async fn summary(&self) -> String {
        let entries = self.entries.read().await;
        let succeeded = entries
            .outcomes
            .values()
            .filter(|outcome| outcome.is_success())
            .count();

        let mut out = format!(
            "{} task(s): {} succeeded, {} failed\n",
            entries.order.len(),
            succeeded,
            entries.order.len() - succeeded
        );

        for id in &entries.order {
            let Some(outcome) = entries.outcomes.get(id) else {
                continue;
            };
            let line = if outcome.is_success() {
                let text = outcome.value().map(display_value).unwrap_or_default();
                format!("- {id} [ok]: {}", truncate(&text, SUMMARY_VALUE_LIMIT))
            } else {
                let category = outcome
                    .error_category()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                let message = outcome.error_message().unwrap_or_default();
                format!(
                    "- {id} [failed: {category}]: {}",
                    truncate(message, SUMMARY_VALUE_LIMIT)
                )
            };
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Truncate on a char boundary, appending "..." when shortened
fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::retry::{AgentResult, ErrorCategory};
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_record_and_lookup() {
        let aggregator = ResultAggregator::new();
        let id = Uuid::new_v4();
        aggregator
            .record(id, AgentResult::success(json!({"rows": 3})))
            .await
            .unwrap();

        assert_eq!(aggregator.len().await, 1);
        let stored = aggregator.get(&id).await.unwrap();
        assert_eq!(stored.value(), Some(&json!({"rows": 3})));
        assert!(aggregator.get(&Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_append_only() {
        let aggregator = ResultAggregator::new();
        let id = Uuid::new_v4();
        aggregator.record(id, AgentResult::success(json!(1))).await.unwrap();
        let err = aggregator
            .record(id, AgentResult::success(json!(2)))
            .await
            .unwrap_err();
        assert_eq!(err, TaskError::AlreadyRecorded { id });
        assert_eq!(aggregator.get(&id).await.unwrap().value(), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_summary_truncates_without_touching_store() {
        let aggregator = ResultAggregator::new();
        let long = "x".repeat(250);
        let ok = Uuid::new_v4();
        let bad = Uuid::new_v4();
        aggregator
            .record(ok, AgentResult::success(json!(long.clone())))
            .await
            .unwrap();
        aggregator
            .record(bad, AgentResult::failure("refused", ErrorCategory::Network, 1))
            .await
            .unwrap();

        let summary = aggregator.summary().await;
        assert!(summary.starts_with("2 task(s): 1 succeeded, 1 failed"));
        assert!(summary.contains(&format!("{}...", "x".repeat(100))));
        assert!(!summary.contains(&"x".repeat(101)));
        assert!(summary.contains("[failed: network]: refused"));

        let snapshot = aggregator.snapshot().await;
        assert_eq!(snapshot[&ok].value(), Some(&json!(long)));
    }

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("short", 10), "short");
    }
}
