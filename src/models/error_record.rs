// Error records - classified failures for observability

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Failure classification. Every error the engine logs lands in exactly one
/// category; the category decides retry behaviour and escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Transient,
    Data,
    BusinessLogic,
    System,
    Inventory,
    Notification,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Data => "data",
            ErrorCategory::BusinessLogic => "business_logic",
            ErrorCategory::System => "system",
            ErrorCategory::Inventory => "inventory",
            ErrorCategory::Notification => "notification",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(ErrorCategory::Transient),
            "data" => Ok(ErrorCategory::Data),
            "business_logic" => Ok(ErrorCategory::BusinessLogic),
            "system" => Ok(ErrorCategory::System),
            "inventory" => Ok(ErrorCategory::Inventory),
            "notification" => Ok(ErrorCategory::Notification),
            other => Err(format!("unknown error category: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Low => "low",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::High => "high",
            ErrorSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(ErrorSeverity::Low),
            "medium" => Ok(ErrorSeverity::Medium),
            "high" => Ok(ErrorSeverity::High),
            "critical" => Ok(ErrorSeverity::Critical),
            other => Err(format!("unknown error severity: {other}")),
        }
    }
}

/// One logged failure, with enough context to reconstruct what happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub context: Map<String, Value>,
}

impl ErrorRecord {
    pub fn new(
        category: ErrorCategory,
        severity: ErrorSeverity,
        message: impl Into<String>,
    ) -> Self {
        ErrorRecord {
            category,
            severity,
            message: message.into(),
            created_at: Utc::now(),
            resolved_at: None,
            context: Map::new(),
        }
    }

    /// Attach one context entry; chainable.
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_tags_round_trip() {
        for category in [
            ErrorCategory::Transient,
            ErrorCategory::Data,
            ErrorCategory::BusinessLogic,
            ErrorCategory::System,
            ErrorCategory::Inventory,
            ErrorCategory::Notification,
        ] {
            assert_eq!(
                category.as_str().parse::<ErrorCategory>().unwrap(),
                category
            );
        }
    }

    #[test]
    fn context_builder_accumulates() {
        let record = ErrorRecord::new(
            ErrorCategory::BusinessLogic,
            ErrorSeverity::Low,
            "permission denied",
        )
        .with_context("actor_id", Value::from(7))
        .with_context("action", Value::from("assign_to_technician"));

        assert_eq!(record.context.len(), 2);
        assert!(record.resolved_at.is_none());
    }
}
