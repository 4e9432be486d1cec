// Notification intents and the delivery retry queue

//! # Notification Models
//!
//! The engine never talks to users directly: each state change produces
//! [`NotificationIntent`] values that an external gateway delivers. Failed
//! deliveries become [`NotificationRetryEntry`] rows and are re-dispatched
//! with exponential backoff by the drain loop.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::role::{Priority, Role, WorkflowType};

/// An outbound notification, rendered but not yet delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationIntent {
    /// To every user holding the successor role after a handoff.
    Assignment {
        role: Role,
        request_id: String,
        description: String,
        priority: Priority,
    },
    /// To the client when a request was created on their behalf.
    ClientOnStaffCreation {
        client_id: i64,
        request_id: String,
        workflow_type: WorkflowType,
        creator_role: Role,
    },
    /// To the staff creator, confirming the submission went through.
    StaffConfirmation {
        staff_id: i64,
        staff_role: Role,
        request_id: String,
        workflow_type: WorkflowType,
        client_name: String,
    },
    /// To the client when the workflow finishes.
    Completion {
        client_id: i64,
        request_id: String,
        rating: Option<u8>,
    },
    /// To the warehouse when consumption hit a stock shortage.
    WarehouseEscalation {
        request_id: String,
        item: String,
        requested: u32,
        available: u32,
    },
}

impl NotificationIntent {
    /// The role the intent is addressed to, as recorded on retry entries.
    /// Client-addressed intents record the client role.
    pub fn recipient_role(&self) -> Role {
        match self {
            NotificationIntent::Assignment { role, .. } => *role,
            NotificationIntent::ClientOnStaffCreation { .. }
            | NotificationIntent::Completion { .. } => Role::Client,
            NotificationIntent::StaffConfirmation { staff_role, .. } => *staff_role,
            NotificationIntent::WarehouseEscalation { .. } => Role::Warehouse,
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            NotificationIntent::Assignment { request_id, .. }
            | NotificationIntent::ClientOnStaffCreation { request_id, .. }
            | NotificationIntent::StaffConfirmation { request_id, .. }
            | NotificationIntent::Completion { request_id, .. }
            | NotificationIntent::WarehouseEscalation { request_id, .. } => request_id,
        }
    }
}

/// Queue row for a failed delivery awaiting re-dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRetryEntry {
    pub request_id: String,
    pub intended_recipient_role: Role,
    pub retry_count: u32,
    pub next_retry_at: DateTime<Utc>,
    pub last_error: String,
}

impl NotificationRetryEntry {
    /// Delay before attempt `retry_count + 1`: exponential from `base`,
    /// doubling per attempt, capped.
    pub fn backoff_delay(retry_count: u32, base_secs: u64, factor: u32, cap_secs: u64) -> Duration {
        let exp = factor.saturating_pow(retry_count.min(31)) as u64;
        let delay = base_secs.saturating_mul(exp).min(cap_secs);
        Duration::seconds(delay as i64)
    }

    pub fn new(
        request_id: impl Into<String>,
        intended_recipient_role: Role,
        last_error: impl Into<String>,
        base_secs: u64,
    ) -> Self {
        NotificationRetryEntry {
            request_id: request_id.into(),
            intended_recipient_role,
            retry_count: 0,
            next_retry_at: Utc::now() + Duration::seconds(base_secs as i64),
            last_error: last_error.into(),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_at <= now
    }

    /// Whether this entry has exhausted its attempts and awaits manual
    /// review.
    pub fn is_exhausted(&self, max_attempts: u32) -> bool {
        self.retry_count >= max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = 30;
        let cap = 30 * 60;
        assert_eq!(
            NotificationRetryEntry::backoff_delay(0, base, 2, cap),
            Duration::seconds(30)
        );
        assert_eq!(
            NotificationRetryEntry::backoff_delay(1, base, 2, cap),
            Duration::seconds(60)
        );
        assert_eq!(
            NotificationRetryEntry::backoff_delay(5, base, 2, cap),
            Duration::seconds(960)
        );
        // 30 * 2^6 = 1920 exceeds the 1800s cap
        assert_eq!(
            NotificationRetryEntry::backoff_delay(6, base, 2, cap),
            Duration::seconds(1800)
        );
        assert_eq!(
            NotificationRetryEntry::backoff_delay(20, base, 2, cap),
            Duration::seconds(1800)
        );
    }

    #[test]
    fn fresh_entry_is_not_due_immediately() {
        let entry = NotificationRetryEntry::new("req-1", Role::Manager, "timeout", 30);
        assert_eq!(entry.retry_count, 0);
        assert!(!entry.is_due(Utc::now()));
        assert!(entry.is_due(Utc::now() + Duration::seconds(31)));
        assert!(!entry.is_exhausted(10));
    }

    #[test]
    fn recipient_role_of_client_intents() {
        let intent = NotificationIntent::Completion {
            client_id: 1,
            request_id: "req-1".to_string(),
            rating: Some(5),
        };
        assert_eq!(intent.recipient_role(), Role::Client);
    }
}
