// Access control - role capabilities and per-request permission checks

//! # Access Control and Permission Matrix
//!
//! Two layers decide whether an actor may do something:
//!
//! 1. **Static capabilities** ([`RolePermissions`]): a fixed per-role record
//!    of what the role may create and how it participates in the staff
//!    creation flow, including the daily creation cap for staff creators.
//! 2. **Dynamic checks** ([`AccessControl`]): per-request rules - the actor
//!    must hold the request's current role for a transition, rating is
//!    reserved for the request's own client, and payload-named actors
//!    (junior manager, technician, operator assignments) must actually hold
//!    the role they are being handed the request as.
//!
//! Every denial is logged as a `business_logic` error record before it is
//! returned.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::models::{
    Action, ErrorCategory, ErrorRecord, ErrorSeverity, Role, ServiceRequest, WorkflowType,
};
use crate::{EngineError, Result};

use super::storage::Store;

/// Verbosity of notifications a role receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Standard,
    Full,
}

/// Fixed capability record of one role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolePermissions {
    pub role: Role,
    pub can_create_connection: bool,
    pub can_create_technical: bool,
    /// Gates creation of direct call-center resolutions.
    pub can_assign_directly: bool,
    pub can_select_client: bool,
    pub can_create_client: bool,
    pub notification_level: NotificationLevel,
    /// Soft cap on staff-created applications per store-local day.
    /// `None` means unlimited. Enforced only for staff creators.
    pub max_applications_per_day: Option<u32>,
}

impl RolePermissions {
    /// The compiled-in capability matrix.
    pub fn for_role(role: Role) -> RolePermissions {
        let (connection, technical, direct, select, create_client, level, cap) = match role {
            Role::Client => (false, false, false, false, false, NotificationLevel::Standard, None),
            Role::Manager => (true, true, true, true, true, NotificationLevel::Full, None),
            Role::JuniorManager => (
                true,
                false,
                false,
                true,
                false,
                NotificationLevel::Standard,
                Some(5),
            ),
            Role::Controller => (
                true,
                true,
                true,
                true,
                false,
                NotificationLevel::Full,
                Some(20),
            ),
            Role::Technician => (false, false, false, false, false, NotificationLevel::Standard, None),
            Role::Warehouse => (false, false, false, false, false, NotificationLevel::Standard, None),
            Role::CallCenter => (
                true,
                true,
                false,
                true,
                true,
                NotificationLevel::Standard,
                Some(50),
            ),
            Role::CallCenterSupervisor => (
                true,
                true,
                true,
                true,
                true,
                NotificationLevel::Full,
                Some(30),
            ),
            Role::Admin => (true, true, true, true, true, NotificationLevel::Full, None),
        };
        RolePermissions {
            role,
            can_create_connection: connection,
            can_create_technical: technical,
            can_assign_directly: direct,
            can_select_client: select,
            can_create_client: create_client,
            notification_level: level,
            max_applications_per_day: cap,
        }
    }

    /// Whether the role may create workflows of the given type on behalf of
    /// a client.
    pub fn can_create(&self, workflow_type: WorkflowType) -> bool {
        match workflow_type {
            WorkflowType::ConnectionRequest => self.can_create_connection,
            WorkflowType::TechnicalService => self.can_create_technical,
            WorkflowType::CallCenterDirect => self.can_assign_directly,
        }
    }
}

/// Payload field naming a target actor, with the role that actor must hold.
fn assignment_target(action: Action) -> Option<(&'static str, Role)> {
    match action {
        Action::AssignToJuniorManager => Some(("junior_manager_id", Role::JuniorManager)),
        Action::AssignToTechnician | Action::AssignTechnicalToTechnician => {
            Some(("technician_id", Role::Technician))
        }
        Action::AssignToCallCenterOperator => Some(("operator_id", Role::CallCenter)),
        _ => None,
    }
}

/// Resolves whether `(actor, action, request)` is permitted.
pub struct AccessControl {
    store: Arc<dyn Store>,
}

impl AccessControl {
    pub fn new(store: Arc<dyn Store>) -> Self {
        AccessControl { store }
    }

    /// Static + dynamic validation of a transition attempt.
    pub async fn validate_transition(
        &self,
        actor_id: i64,
        actor_role: Role,
        action: Action,
        request: &ServiceRequest,
        payload: &Map<String, Value>,
    ) -> Result<()> {
        // Rating is reserved for the client the request belongs to.
        if action == Action::RateService {
            if actor_role != Role::Client || actor_id != request.client_id {
                return self
                    .deny(
                        actor_id,
                        action,
                        &request.id,
                        "rate_service is allowed only to the request's client",
                    )
                    .await;
            }
            return Ok(());
        }

        if actor_role != request.current_role {
            return self
                .deny(
                    actor_id,
                    action,
                    &request.id,
                    "actor role does not match current_role",
                )
                .await;
        }

        // Payload-named actors must hold the role they are assigned as.
        if let Some((field, expected_role)) = assignment_target(action) {
            if let Some(target_id) = payload.get(field).and_then(Value::as_i64) {
                let holds_role = self
                    .store
                    .get_user(target_id)
                    .await?
                    .map(|user| user.role == expected_role)
                    .unwrap_or(false);
                if !holds_role {
                    let reason =
                        format!("{field} does not reference a {}", expected_role.as_str());
                    return self.deny(actor_id, action, &request.id, &reason).await;
                }
            }
        }

        Ok(())
    }

    /// Validation of a creation attempt. Clients may open their own
    /// connection and technical requests; staff creation is gated by the
    /// capability matrix.
    pub async fn validate_creation(
        &self,
        creator_id: i64,
        creator_role: Role,
        workflow_type: WorkflowType,
    ) -> Result<()> {
        if creator_role == Role::Client {
            if workflow_type == WorkflowType::CallCenterDirect {
                return self
                    .deny_creation(
                        creator_id,
                        creator_role,
                        workflow_type,
                        "clients cannot open direct call-center resolutions",
                    )
                    .await;
            }
            return Ok(());
        }

        let permissions = RolePermissions::for_role(creator_role);
        if !permissions.can_create(workflow_type) {
            let reason = format!(
                "role {} cannot create {} applications",
                creator_role, workflow_type
            );
            return self
                .deny_creation(creator_id, creator_role, workflow_type, &reason)
                .await;
        }
        Ok(())
    }

    async fn deny(
        &self,
        actor_id: i64,
        action: Action,
        request_id: &str,
        reason: &str,
    ) -> Result<()> {
        warn!(actor_id, action = %action, request_id, reason, "transition denied");
        self.log_denial(
            ErrorRecord::new(ErrorCategory::BusinessLogic, ErrorSeverity::Low, reason)
                .with_context("actor_id", Value::from(actor_id))
                .with_context("action", Value::from(action.as_str()))
                .with_context("request_id", Value::from(request_id)),
        )
        .await;
        Err(EngineError::PermissionDenied(reason.to_string()))
    }

    async fn deny_creation(
        &self,
        creator_id: i64,
        creator_role: Role,
        workflow_type: WorkflowType,
        reason: &str,
    ) -> Result<()> {
        warn!(creator_id, role = %creator_role, workflow_type = %workflow_type, reason, "creation denied");
        self.log_denial(
            ErrorRecord::new(ErrorCategory::BusinessLogic, ErrorSeverity::Low, reason)
                .with_context("creator_id", Value::from(creator_id))
                .with_context("creator_role", Value::from(creator_role.as_str()))
                .with_context("workflow_type", Value::from(workflow_type.as_str())),
        )
        .await;
        Err(EngineError::PermissionDenied(reason.to_string()))
    }

    /// Denial logging is best-effort; a failing error log never masks the
    /// denial itself.
    async fn log_denial(&self, record: ErrorRecord) {
        if let Err(err) = self.store.insert_error_record(&record).await {
            warn!(error = %err, "failed to record access denial");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::storage::InMemoryStore;
    use crate::models::{ContactInfo, Priority, User};

    fn request_at(role: Role) -> ServiceRequest {
        let mut request = ServiceRequest::new(
            WorkflowType::ConnectionRequest,
            1,
            role,
            "install".to_string(),
            "Tashkent".to_string(),
            ContactInfo::default(),
            Priority::Medium,
        );
        request.id = "req-1".to_string();
        request
    }

    #[test]
    fn capability_matrix_encodes_the_hierarchy() {
        let manager = RolePermissions::for_role(Role::Manager);
        assert!(manager.can_create(WorkflowType::ConnectionRequest));
        assert!(manager.can_create(WorkflowType::TechnicalService));
        assert!(manager.can_create_client);
        assert_eq!(manager.max_applications_per_day, None);

        let junior = RolePermissions::for_role(Role::JuniorManager);
        assert!(junior.can_create(WorkflowType::ConnectionRequest));
        assert!(!junior.can_create(WorkflowType::TechnicalService));
        assert_eq!(junior.max_applications_per_day, Some(5));

        let operator = RolePermissions::for_role(Role::CallCenter);
        assert!(operator.can_create(WorkflowType::ConnectionRequest));
        assert!(operator.can_create(WorkflowType::TechnicalService));
        assert_eq!(operator.max_applications_per_day, Some(50));

        for role in [Role::Client, Role::Technician, Role::Warehouse] {
            let denied = RolePermissions::for_role(role);
            assert!(!denied.can_create(WorkflowType::ConnectionRequest));
            assert!(!denied.can_create(WorkflowType::TechnicalService));
        }
    }

    #[tokio::test]
    async fn wrong_role_is_denied_with_canonical_reason_and_logged() {
        let store = Arc::new(InMemoryStore::new());
        let access = AccessControl::new(Arc::clone(&store) as Arc<dyn Store>);
        let request = request_at(Role::Controller);

        let err = access
            .validate_transition(
                5,
                Role::Technician,
                Action::AssignToTechnician,
                &request,
                &Map::new(),
            )
            .await
            .unwrap_err();
        match err {
            EngineError::PermissionDenied(reason) => {
                assert_eq!(reason, "actor role does not match current_role")
            }
            other => panic!("unexpected error: {other}"),
        }

        let errors = store
            .recent_error_records(chrono::Utc::now() - chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].category, ErrorCategory::BusinessLogic);
    }

    #[tokio::test]
    async fn assignment_target_must_hold_the_role() {
        let store = Arc::new(InMemoryStore::new());
        let mut technician = User::new_client(0, "+998900000001", "Texnik", "uz", None);
        technician.role = Role::Technician;
        let technician_id = store.insert_user(&technician).await.unwrap();

        let access = AccessControl::new(Arc::clone(&store) as Arc<dyn Store>);
        let request = request_at(Role::Controller);

        let mut payload = Map::new();
        payload.insert("technician_id".to_string(), Value::from(technician_id));
        assert!(access
            .validate_transition(3, Role::Controller, Action::AssignToTechnician, &request, &payload)
            .await
            .is_ok());

        // A user id that is not a technician is rejected.
        let mut wrong = Map::new();
        wrong.insert("technician_id".to_string(), Value::from(9999));
        let err = access
            .validate_transition(3, Role::Controller, Action::AssignToTechnician, &request, &wrong)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn rating_is_reserved_for_the_bound_client() {
        let store = Arc::new(InMemoryStore::new());
        let access = AccessControl::new(Arc::clone(&store) as Arc<dyn Store>);
        let request = request_at(Role::Client);

        assert!(access
            .validate_transition(1, Role::Client, Action::RateService, &request, &Map::new())
            .await
            .is_ok());

        let err = access
            .validate_transition(2, Role::Client, Action::RateService, &request, &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PermissionDenied(_)));
    }
}
