// Service request domain model - the unit the engine routes

//! # Service Request Models
//!
//! A [`ServiceRequest`] is one workflow execution instance: a customer
//! request moving through organizational roles until completion. Alongside
//! it live the typed pieces of its payload:
//! - [`ContactInfo`]: the client-facing name/phone/address bundle
//! - [`EquipmentItem`]: one line of consumed equipment
//! - [`StateData`]: the keyed bag carrying action-supplied fields across
//!   transitions, with named accessors for every key the engine itself
//!   reads or writes
//! - [`StaffCreatorInfo`]: creator metadata for staff-created requests

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::role::{Priority, RequestStatus, Role, WorkflowType};

/// Client contact details carried on a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// One line of equipment consumed by an installation or repair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentItem {
    pub name: String,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "type")]
    pub kind: Option<String>,
}

/// Staff-creation context carried in [`StateData`] and on audit rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffCreatorInfo {
    pub creator_id: i64,
    pub creator_role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_name: Option<String>,
}

/// Keyed map carrying action-supplied fields across transitions.
///
/// The map is opaque at the storage layer but never schemaless in meaning:
/// each key is defined by the transitions that set it. Keys the engine
/// itself depends on are read and written only through the named accessors
/// below; action payload keys pass through [`StateData::merge`] untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateData(pub Map<String, Value>);

impl StateData {
    const CREATED_BY_STAFF: &'static str = "created_by_staff";
    const STAFF_CREATOR_INFO: &'static str = "staff_creator_info";
    const STAFF_CREATION_TIMESTAMP: &'static str = "staff_creation_timestamp";
    const EQUIPMENT_SHORTAGE: &'static str = "equipment_shortage";
    const ASSIGNED_USER_ID: &'static str = "assigned_user_id";

    pub fn new() -> Self {
        StateData(Map::new())
    }

    /// Dict-union merge: keys from `other` win over existing keys.
    pub fn merge(&mut self, other: &Map<String, Value>) {
        for (key, value) in other {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert<K: Into<String>>(&mut self, key: K, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn created_by_staff(&self) -> bool {
        self.0
            .get(Self::CREATED_BY_STAFF)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn staff_creator(&self) -> Option<StaffCreatorInfo> {
        self.0
            .get(Self::STAFF_CREATOR_INFO)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    /// Record the staff-creation context. Set once at creation and carried
    /// unchanged through every later transition.
    pub fn set_staff_context(&mut self, info: &StaffCreatorInfo, at: DateTime<Utc>) {
        self.0.insert(
            Self::CREATED_BY_STAFF.to_string(),
            Value::Bool(true),
        );
        self.0.insert(
            Self::STAFF_CREATOR_INFO.to_string(),
            serde_json::json!({
                "creator_id": info.creator_id,
                "creator_role": info.creator_role,
                "creator_name": info.creator_name,
            }),
        );
        self.0.insert(
            Self::STAFF_CREATION_TIMESTAMP.to_string(),
            Value::String(at.to_rfc3339()),
        );
    }

    pub fn equipment_shortage(&self) -> bool {
        self.0
            .get(Self::EQUIPMENT_SHORTAGE)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_equipment_shortage(&mut self) {
        self.0
            .insert(Self::EQUIPMENT_SHORTAGE.to_string(), Value::Bool(true));
    }

    pub fn assigned_user(&self) -> Option<i64> {
        self.0.get(Self::ASSIGNED_USER_ID).and_then(Value::as_i64)
    }

    pub fn set_assigned_user(&mut self, user_id: i64) {
        self.0
            .insert(Self::ASSIGNED_USER_ID.to_string(), Value::from(user_id));
    }
}

/// The unit the engine routes: one service request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    /// Opaque unique identifier.
    pub id: String,

    pub workflow_type: WorkflowType,

    /// The client the request belongs to. Immutable post-creation.
    pub client_id: i64,

    /// The role whose turn it is. Always a role with a defined step in the
    /// registry for `workflow_type`.
    pub current_role: Role,

    pub current_status: RequestStatus,
    pub priority: Priority,

    pub description: String,
    pub location: String,
    pub contact_info: ContactInfo,

    /// Action-supplied fields carried across transitions.
    pub state_data: StateData,

    /// Appended only by the role holding the equipment-documentation step.
    pub equipment_used: Vec<EquipmentItem>,

    /// Flips to true at most once, via the warehouse inventory update.
    pub inventory_updated: bool,

    /// 1..=5, writable only on the rating completion action.
    pub completion_rating: Option<u8>,
    pub feedback_comments: Option<String>,

    pub created_by_staff: bool,
    pub staff_creator_id: Option<i64>,
    pub staff_creator_role: Option<Role>,

    /// Staff-role tag of the creator, or `client`.
    pub creation_source: String,

    pub client_notified_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceRequest {
    /// Create a new request in the given workflow with a generated id.
    pub fn new(
        workflow_type: WorkflowType,
        client_id: i64,
        initial_role: Role,
        description: String,
        location: String,
        contact_info: ContactInfo,
        priority: Priority,
    ) -> Self {
        let now = Utc::now();
        ServiceRequest {
            id: Uuid::new_v4().to_string(),
            workflow_type,
            client_id,
            current_role: initial_role,
            current_status: RequestStatus::Created,
            priority,
            description,
            location,
            contact_info,
            state_data: StateData::new(),
            equipment_used: Vec::new(),
            inventory_updated: false,
            completion_rating: None,
            feedback_comments: None,
            created_by_staff: false,
            staff_creator_id: None,
            staff_creator_role: None,
            creation_source: "client".to_string(),
            client_notified_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark the request as created by a staff member on behalf of the
    /// client. Mirrors the creator into both the dedicated columns and the
    /// state-data bag so downstream transitions can annotate themselves.
    pub fn mark_staff_created(&mut self, info: &StaffCreatorInfo) {
        self.created_by_staff = true;
        self.staff_creator_id = Some(info.creator_id);
        self.staff_creator_role = Some(info.creator_role);
        self.creation_source = info.creator_role.as_str().to_string();
        self.state_data.set_staff_context(info, Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.current_status.is_terminal()
    }

    /// Audit annotation appended to every transition comment of a
    /// staff-created request. The exact wording is load-bearing for
    /// auditors; callers embed it verbatim.
    pub fn staff_comment_annotation(&self) -> Option<String> {
        if !self.state_data.created_by_staff() {
            return None;
        }
        let creator_role = self
            .state_data
            .staff_creator()
            .map(|info| info.creator_role.as_str().to_string())
            .or_else(|| self.staff_creator_role.map(|r| r.as_str().to_string()))?;
        let client_name = if self.contact_info.full_name.is_empty() {
            "Unknown Client".to_string()
        } else {
            self.contact_info.full_name.clone()
        };
        Some(format!(
            "Staff-created request by {creator_role} for {client_name}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> ServiceRequest {
        ServiceRequest::new(
            WorkflowType::ConnectionRequest,
            1,
            Role::Manager,
            "install".to_string(),
            "Tashkent".to_string(),
            ContactInfo {
                full_name: "Ahmad Karimov".to_string(),
                phone: "+998901234567".to_string(),
                address: None,
            },
            Priority::Medium,
        )
    }

    #[test]
    fn new_request_starts_clean() {
        let request = sample_request();
        assert_eq!(request.current_status, RequestStatus::Created);
        assert!(!request.created_by_staff);
        assert_eq!(request.creation_source, "client");
        assert!(request.equipment_used.is_empty());
        assert!(!request.inventory_updated);
        assert!(request.completion_rating.is_none());
    }

    #[test]
    fn state_data_merge_new_keys_win() {
        let mut data = StateData::new();
        data.insert("call_notes", Value::from("first"));
        data.insert("kept", Value::from(true));

        let mut incoming = Map::new();
        incoming.insert("call_notes".to_string(), Value::from("second"));
        incoming.insert("technician_id".to_string(), Value::from(5));
        data.merge(&incoming);

        assert_eq!(data.get("call_notes"), Some(&Value::from("second")));
        assert_eq!(data.get("kept"), Some(&Value::from(true)));
        assert_eq!(data.get("technician_id"), Some(&Value::from(5)));
    }

    #[test]
    fn staff_marking_sets_columns_and_bag() {
        let mut request = sample_request();
        request.mark_staff_created(&StaffCreatorInfo {
            creator_id: 42,
            creator_role: Role::CallCenter,
            creator_name: Some("Operator".to_string()),
        });

        assert!(request.created_by_staff);
        assert_eq!(request.staff_creator_id, Some(42));
        assert_eq!(request.staff_creator_role, Some(Role::CallCenter));
        assert_eq!(request.creation_source, "call_center");
        assert!(request.state_data.created_by_staff());
        assert_eq!(
            request.state_data.staff_creator().unwrap().creator_id,
            42
        );
    }

    #[test]
    fn staff_annotation_wording() {
        let mut request = sample_request();
        assert!(request.staff_comment_annotation().is_none());

        request.mark_staff_created(&StaffCreatorInfo {
            creator_id: 42,
            creator_role: Role::CallCenter,
            creator_name: None,
        });
        assert_eq!(
            request.staff_comment_annotation().unwrap(),
            "Staff-created request by call_center for Ahmad Karimov"
        );
    }
}
