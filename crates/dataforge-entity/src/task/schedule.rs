//! Recurrence schedule types.
//!
//! The `schedule_type` column is stored as a raw string so that rows with
//! unrecognized values still decode; the scheduler treats anything it cannot
//! parse as daily recurrence.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Recognized recurrence schedule kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    /// Fire once, then disable recurrence.
    Once,
    /// Fire every N days.
    Daily,
    /// Fire every N weeks.
    Weekly,
    /// Fire every N months (30·N days).
    Monthly,
    /// Fire according to a cron expression in `schedule_value`.
    Cron,
}

impl ScheduleType {
    /// Parse a raw schedule type string. Returns `None` for unrecognized
    /// values; callers decide the fallback semantics.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "once" => Some(Self::Once),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "cron" => Some(Self::Cron),
            _ => None,
        }
    }

    /// Return the schedule type as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Cron => "cron",
        }
    }
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recurrence policy attached to a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSpec {
    /// Schedule kind (raw string, see [`ScheduleType::parse`]).
    pub schedule_type: String,
    /// Schedule argument: an interval multiplier or a cron expression.
    pub schedule_value: Option<String>,
    /// Maximum number of firings; `None` means unlimited.
    pub max_runs: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_types() {
        assert_eq!(ScheduleType::parse("daily"), Some(ScheduleType::Daily));
        assert_eq!(ScheduleType::parse("CRON"), Some(ScheduleType::Cron));
        assert_eq!(ScheduleType::parse(" once "), Some(ScheduleType::Once));
    }

    #[test]
    fn test_parse_unknown_type() {
        assert_eq!(ScheduleType::parse("fortnightly"), None);
        assert_eq!(ScheduleType::parse(""), None);
    }
}
