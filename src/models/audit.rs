// Staff application audit rows - denormalised staff-creation records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::role::{Role, WorkflowType};

/// Denormalised record of one staff-created application.
///
/// Written immediately after a staff-initiated workflow is successfully
/// initiated. `client_notified` flips true once the staff-origin
/// notification to the client is delivered. The daily creation quota counts
/// these rows per creator per store-local calendar day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffApplicationAudit {
    pub application_id: String,
    pub creator_id: i64,
    pub creator_role: Role,
    pub client_id: i64,
    pub application_type: WorkflowType,
    pub creation_timestamp: DateTime<Utc>,
    pub client_notified: bool,
    pub workflow_initiated: bool,
    /// Session id, permission snapshot and the submitted application data.
    pub metadata: Map<String, Value>,
}

/// One recorded stock movement, written alongside each consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryMovement {
    pub request_id: String,
    pub item_name: String,
    pub quantity: u32,
    pub recorded_at: DateTime<Utc>,
}

impl InventoryMovement {
    pub fn new(request_id: impl Into<String>, item_name: impl Into<String>, quantity: u32) -> Self {
        InventoryMovement {
            request_id: request_id.into(),
            item_name: item_name.into(),
            quantity,
            recorded_at: Utc::now(),
        }
    }
}

impl StaffApplicationAudit {
    pub fn new(
        application_id: impl Into<String>,
        creator_id: i64,
        creator_role: Role,
        client_id: i64,
        application_type: WorkflowType,
        metadata: Map<String, Value>,
    ) -> Self {
        StaffApplicationAudit {
            application_id: application_id.into(),
            creator_id,
            creator_role,
            client_id,
            application_type,
            creation_timestamp: Utc::now(),
            client_notified: false,
            workflow_initiated: true,
            metadata,
        }
    }
}
