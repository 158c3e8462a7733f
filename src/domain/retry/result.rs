//! Uniform Outcome Type
//!
//! `AgentResult` is the structured success/failure value every fallible
//! operation in the crate is converted into.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Coarse classification of a failure.
///
/// Advisory only: categories are derived heuristically and are meant for
/// retry filtering and reporting, not for exhaustive error matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    Permission,
    NotFound,
    Validation,
    Syntax,
    Logic,
    Api,
    Unknown,
    /// Raised by the scheduler for tasks whose dependencies can never resolve
    DependencyCycle,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Permission => "permission",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Syntax => "syntax",
            ErrorCategory::Logic => "logic",
            ErrorCategory::Api => "api",
            ErrorCategory::Unknown => "unknown",
            ErrorCategory::DependencyCycle => "dependency_cycle",
        };
        f.write_str(s)
    }
}

/// Informational quality tag attached to a result. Never used for control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
    #[default]
    Unknown,
}

/// Outcome of a fallible operation.
///
/// Exactly one of `value` / `error_message` is populated; the constructors
/// are the only way to build one, and deserialization rejects anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "RawAgentResult<T>",
    bound(deserialize = "T: Deserialize<'de>")
)]
pub struct AgentResult<T = serde_json::Value> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_category: Option<ErrorCategory>,
    confidence: ConfidenceLevel,
    retry_count: u32,
    metadata: HashMap<String, serde_json::Value>,
}

/// Wire shape of [`AgentResult`], checked before it becomes one
#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct RawAgentResult<T> {
    success: bool,
    /// A present `null` is a value, only an absent field means none
    #[serde(default, deserialize_with = "present")]
    value: Option<T>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    error_category: Option<ErrorCategory>,
    #[serde(default)]
    confidence: ConfidenceLevel,
    #[serde(default)]
    retry_count: u32,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl<T> TryFrom<RawAgentResult<T>> for AgentResult<T> {
    type Error = String;

    fn try_from(raw: RawAgentResult<T>) -> Result<Self, Self::Error> {
        match (raw.success, raw.value.is_some(), raw.error_message.is_some()) {
            (true, true, false) if raw.error_category.is_none() => {}
            (false, false, true) => {}
            (success, has_value, has_error) => {
                return Err(format!(
                    "inconsistent result: success={success}, value present={has_value}, error present={has_error}"
                ));
            }
        }
        Ok(Self {
            success: raw.success,
            value: raw.value,
            error_message: raw.error_message,
            error_category: raw.error_category,
            confidence: raw.confidence,
            retry_count: raw.retry_count,
            metadata: raw.metadata,
        })
    }
}

impl<T> AgentResult<T> {
    /// Create a successful result
    pub fn success(value: T) -> Self {
        Self::success_with_confidence(value, ConfidenceLevel::Medium)
    }

    /// Create a successful result with an explicit confidence tag
    pub fn success_with_confidence(value: T, confidence: ConfidenceLevel) -> Self {
        Self {
            success: true,
            value: Some(value),
            error_message: None,
            error_category: None,
            confidence,
            retry_count: 0,
            metadata: HashMap::new(),
        }
    }

    /// Create a failed result
    pub fn failure(
        error_message: impl Into<String>,
        error_category: ErrorCategory,
        retry_count: u32,
    ) -> Self {
        Self {
            success: false,
            value: None,
            error_message: Some(error_message.into()),
            error_category: Some(error_category),
            confidence: ConfidenceLevel::Unknown,
            retry_count,
            metadata: HashMap::new(),
        }
    }

    /// Builder: attach a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn error_category(&self) -> Option<ErrorCategory> {
        self.error_category
    }

    pub fn confidence(&self) -> ConfidenceLevel {
        self.confidence
    }

    /// Number of attempts beyond the first
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    pub(crate) fn set_retry_count(&mut self, retry_count: u32) {
        self.retry_count = retry_count;
    }

    /// Convert into a plain `Result`, keeping the category alongside the message
    pub fn into_result(self) -> Result<T, (ErrorCategory, String)> {
        match self.value {
            Some(value) if self.success => Ok(value),
            _ => Err((
                self.error_category.unwrap_or(ErrorCategory::Unknown),
                self.error_message.unwrap_or_default(),
            )),
        }
    }

    /// Map the success value, preserving every other field
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> AgentResult<U> {
        AgentResult {
            success: self.success,
            value: self.value.map(f),
            error_message: self.error_message,
            error_category: self.error_category,
            confidence: self.confidence,
            retry_count: self.retry_count,
            metadata: self.metadata,
        }
    }
}

impl<T: Serialize> AgentResult<T> {
    /// Serialize to a JSON value
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}
