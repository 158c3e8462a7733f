//! Priority levels shared by tasks and messages.

use serde::{Deserialize, Serialize};

/// Urgency level. Lower numeric value dispatches first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Priority {
    Critical = 0,
    High = 1,
    #[default]
    Medium = 2,
    Low = 3,
}

impl Priority {
    /// Numeric rank (0 = most urgent)
    #[must_use]
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// Build from a numeric rank, clamping anything above 3 to `Low`
    #[must_use]
    pub fn from_rank(rank: u8) -> Self {
        match rank {
            0 => Priority::Critical,
            1 => Priority::High,
            2 => Priority::Medium,
            _ => Priority::Low,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Critical => write!(f, "critical"),
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}
