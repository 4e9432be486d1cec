// State transition audit rows - append-only history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::role::Role;

/// One applied action, recorded forever.
///
/// Every successful initiation and transition appends exactly one row; rows
/// are never modified. Per request, rows are monotonic in
/// `(created_at, id)` - `id` is assigned by the store and breaks timestamp
/// ties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Monotonic row id, assigned by the store on insert.
    pub id: i64,

    pub request_id: String,

    /// `None` for the initiation row.
    pub from_role: Option<Role>,

    /// `None` for terminal (completion) rows.
    pub to_role: Option<Role>,

    /// Action tag as stored. Registry actions use their canonical tags;
    /// recovery annotations use free-form tags.
    pub action: String,

    pub actor_id: Option<i64>,

    /// Snapshot of the payload that accompanied the action.
    pub transition_data: Map<String, Value>,

    pub comments: String,

    pub created_at: DateTime<Utc>,
}

impl StateTransition {
    /// Build a row that has not yet been assigned a store id.
    pub fn new(
        request_id: impl Into<String>,
        from_role: Option<Role>,
        to_role: Option<Role>,
        action: impl Into<String>,
        actor_id: Option<i64>,
        transition_data: Map<String, Value>,
        comments: impl Into<String>,
    ) -> Self {
        StateTransition {
            id: 0,
            request_id: request_id.into(),
            from_role,
            to_role,
            action: action.into(),
            actor_id,
            transition_data,
            comments: comments.into(),
            created_at: Utc::now(),
        }
    }

    pub fn is_initiation(&self) -> bool {
        self.from_role.is_none()
    }

    pub fn is_terminal(&self) -> bool {
        self.to_role.is_none() && self.from_role.is_some()
    }
}
