// Workflow engine - top-level orchestration of the request lifecycle

//! # Workflow Engine
//!
//! The top-level orchestrator. Every lifecycle operation follows the same
//! shape: validate against the registry and access control, apply the state
//! change through the state manager (one store transaction), then fan out
//! notification intents. Any validation failure is returned before side
//! effects; notification failures never fail the operation that produced
//! them.
//!
//! Staff-created requests keep their creator context in `state_data` for
//! the whole lifecycle, and every audit row they produce carries the
//! byte-exact annotation `Staff-created request by <role> for <client>` in
//! its comment.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{info, instrument};

use crate::models::{
    Action, ContactInfo, NotificationIntent, Priority, RequestStatus, Role, ServiceRequest,
    StaffCreatorInfo, WorkflowRegistry, WorkflowStatus, WorkflowType,
};
use crate::{EngineError, Result};

use super::access::AccessControl;
use super::inventory::InventoryManager;
use super::notify::NotificationSystem;
use super::state_manager::{CreateRequest, StateManager, StateUpdate};

/// Input bundle for [`WorkflowEngine::initiate_workflow`].
#[derive(Debug, Clone)]
pub struct InitiationData {
    pub client_id: i64,
    pub description: String,
    pub location: String,
    pub contact_info: ContactInfo,
    pub priority: Priority,
    /// Present when a staff member creates the request on behalf of the
    /// client.
    pub staff_creator: Option<StaffCreatorInfo>,
    /// Extra action-supplied fields seeded into `state_data`.
    pub payload: Map<String, Value>,
}

/// Input bundle for [`WorkflowEngine::complete_workflow`].
#[derive(Debug, Clone)]
pub struct CompletionData {
    pub rating: u8,
    pub feedback: Option<String>,
    pub actor_id: i64,
    pub actor_role: Role,
}

pub struct WorkflowEngine {
    state_manager: Arc<StateManager>,
    registry: Arc<WorkflowRegistry>,
    access_control: Arc<AccessControl>,
    notifications: Arc<NotificationSystem>,
    inventory: Arc<InventoryManager>,
}

impl WorkflowEngine {
    pub fn new(
        state_manager: Arc<StateManager>,
        registry: Arc<WorkflowRegistry>,
        access_control: Arc<AccessControl>,
        notifications: Arc<NotificationSystem>,
        inventory: Arc<InventoryManager>,
    ) -> Self {
        WorkflowEngine {
            state_manager,
            registry,
            access_control,
            notifications,
            inventory,
        }
    }

    pub fn registry(&self) -> &Arc<WorkflowRegistry> {
        &self.registry
    }

    pub fn state_manager(&self) -> &Arc<StateManager> {
        &self.state_manager
    }

    /// Initiate a workflow given its stored type tag. Unknown tags fail
    /// without side effects.
    pub async fn initiate_workflow_by_tag(
        &self,
        workflow_type: &str,
        data: InitiationData,
    ) -> Result<String> {
        let workflow_type = workflow_type
            .parse::<WorkflowType>()
            .map_err(EngineError::UnknownWorkflow)?;
        self.initiate_workflow(workflow_type, data).await
    }

    /// Create a request and its initiation audit row, then fan out the
    /// initiation notifications. Returns the new request id.
    #[instrument(skip(self, data), fields(workflow_type = %workflow_type))]
    pub async fn initiate_workflow(
        &self,
        workflow_type: WorkflowType,
        data: InitiationData,
    ) -> Result<String> {
        let (creator_id, creator_role) = match &data.staff_creator {
            Some(creator) => (creator.creator_id, creator.creator_role),
            None => (data.client_id, Role::Client),
        };
        self.access_control
            .validate_creation(creator_id, creator_role, workflow_type)
            .await?;

        let initiation_comment = initiation_comment(&data);

        let request_id = self
            .state_manager
            .create_request(
                workflow_type,
                CreateRequest {
                    client_id: data.client_id,
                    description: data.description.clone(),
                    location: data.location.clone(),
                    contact_info: data.contact_info.clone(),
                    priority: data.priority,
                    staff_creator: data.staff_creator.clone(),
                    initial_state_data: data.payload.clone(),
                    actor_id: Some(creator_id),
                    initiation_comment,
                },
            )
            .await?;

        let initial_role = self.registry.initial_role(workflow_type);

        // Staff-origin notices are queued before the assignment notice.
        if let Some(creator) = &data.staff_creator {
            let client_notified = self
                .notifications
                .dispatch(&NotificationIntent::ClientOnStaffCreation {
                    client_id: data.client_id,
                    request_id: request_id.clone(),
                    workflow_type,
                    creator_role: creator.creator_role,
                })
                .await;
            if client_notified {
                self.state_manager
                    .update_request_state(
                        &request_id,
                        StateUpdate {
                            client_notified_at: Some(chrono::Utc::now()),
                            ..Default::default()
                        },
                        "notification",
                    )
                    .await?;
            }

            self.notifications
                .dispatch(&NotificationIntent::StaffConfirmation {
                    staff_id: creator.creator_id,
                    staff_role: creator.creator_role,
                    request_id: request_id.clone(),
                    workflow_type,
                    client_name: data.contact_info.full_name.clone(),
                })
                .await;
        }

        self.notifications
            .dispatch(&NotificationIntent::Assignment {
                role: initial_role,
                request_id: request_id.clone(),
                description: data.description.clone(),
                priority: data.priority,
            })
            .await;

        info!(request_id = %request_id, initial_role = %initial_role, "workflow initiated");
        Ok(request_id)
    }

    /// Apply one action to a request. The validation order is fixed:
    /// existence, registry declaration, access control, payload fields.
    /// Any failure returns before side effects.
    #[instrument(skip(self, payload), fields(request_id = %request_id, action = %action, actor_role = %actor_role))]
    pub async fn transition_workflow(
        &self,
        request_id: &str,
        action: Action,
        actor_id: i64,
        actor_role: Role,
        payload: Map<String, Value>,
    ) -> Result<()> {
        let request = self
            .state_manager
            .get_request(request_id)
            .await?
            .ok_or_else(|| EngineError::RequestNotFound(request_id.to_string()))?;

        if request.is_terminal() {
            return Err(EngineError::InvalidTransition(format!(
                "request {request_id} is {}",
                request.current_status
            )));
        }

        let definition = self.registry.definition(request.workflow_type);
        if definition.is_completion_action(action) {
            return Err(EngineError::InvalidTransition(format!(
                "{action} completes the workflow; use complete_workflow"
            )));
        }
        let declared = definition
            .step(request.current_role)
            .map(|step| step.allows(action))
            .unwrap_or(false);
        if !declared {
            return Err(EngineError::ActionNotAllowed {
                role: request.current_role.as_str().to_string(),
                action: action.as_str().to_string(),
            });
        }

        self.access_control
            .validate_transition(actor_id, actor_role, action, &request, &payload)
            .await?;

        if let Err(field) = self.registry.validate_payload(
            request.workflow_type,
            request.current_role,
            action,
            &payload,
        ) {
            return Err(EngineError::ValidationFailed {
                field,
                reason: "required field missing".to_string(),
            });
        }

        let successor = self
            .registry
            .successor(request.workflow_type, request.current_role, action)
            .ok_or_else(|| EngineError::ActionNotAllowed {
                role: request.current_role.as_str().to_string(),
                action: action.as_str().to_string(),
            })?;

        // Equipment documentation appends to the request's equipment list.
        let equipment_used = if action == Action::DocumentEquipment {
            let items = payload
                .get("equipment_used")
                .cloned()
                .ok_or_else(|| EngineError::ValidationFailed {
                    field: "equipment_used".to_string(),
                    reason: "required field missing".to_string(),
                })?;
            let parsed: Vec<crate::models::EquipmentItem> = serde_json::from_value(items)
                .map_err(|err| EngineError::ValidationFailed {
                    field: "equipment_used".to_string(),
                    reason: err.to_string(),
                })?;
            let mut combined = request.equipment_used.clone();
            combined.extend(parsed);
            Some(combined)
        } else {
            None
        };

        let comments = transition_comment(&request, action, &payload);
        let role_changed = successor.next_role != request.current_role;

        self.state_manager
            .update_request_state(
                request_id,
                StateUpdate {
                    current_role: Some(successor.next_role),
                    current_status: Some(RequestStatus::InProgress),
                    state_data: Some(payload.clone()),
                    equipment_used,
                    action: action.as_str().to_string(),
                    actor_id: Some(actor_id),
                    transition_data: payload.clone(),
                    comments,
                    always_record: true,
                    ..Default::default()
                },
                &actor_id.to_string(),
            )
            .await?;

        if role_changed {
            self.notifications
                .dispatch(&NotificationIntent::Assignment {
                    role: successor.next_role,
                    request_id: request_id.to_string(),
                    description: request.description.clone(),
                    priority: request.priority,
                })
                .await;
        }

        if action == Action::UpdateInventory {
            self.inventory.consume_for_request(request_id).await?;
        }

        info!(
            request_id,
            from = %request.current_role,
            to = %successor.next_role,
            "workflow transitioned"
        );
        Ok(())
    }

    /// Terminal rating step. Validates the 1..=5 rating, records it with
    /// the feedback, and appends the terminal transition row
    /// (`to_role = None`). Idempotent on an already-completed request: no
    /// new row, `updated_at` untouched.
    #[instrument(skip(self, data), fields(request_id = %request_id))]
    pub async fn complete_workflow(&self, request_id: &str, data: CompletionData) -> Result<()> {
        let request = self
            .state_manager
            .get_request(request_id)
            .await?
            .ok_or_else(|| EngineError::RequestNotFound(request_id.to_string()))?;

        if request.current_status == RequestStatus::Completed {
            return Ok(());
        }
        if request.current_status == RequestStatus::Cancelled {
            return Err(EngineError::InvalidTransition(format!(
                "request {request_id} is cancelled"
            )));
        }

        if !(1..=5).contains(&data.rating) {
            return Err(EngineError::ValidationFailed {
                field: "rating".to_string(),
                reason: format!("rating {} outside 1..=5", data.rating),
            });
        }

        // Admin recovery completes on behalf of the system; otherwise the
        // rating belongs to the request's client alone.
        if data.actor_role != Role::Admin {
            self.access_control
                .validate_transition(
                    data.actor_id,
                    data.actor_role,
                    Action::RateService,
                    &request,
                    &Map::new(),
                )
                .await?;
        }

        let base = "Workflow completed".to_string();
        let comments = match request.staff_comment_annotation() {
            Some(annotation) => format!("{base} ({annotation})"),
            None => base,
        };

        let mut transition_data = Map::new();
        transition_data.insert("rating".to_string(), Value::from(data.rating));
        if let Some(feedback) = &data.feedback {
            transition_data.insert("feedback".to_string(), Value::from(feedback.clone()));
        }

        self.state_manager
            .update_request_state(
                request_id,
                StateUpdate {
                    current_status: Some(RequestStatus::Completed),
                    completion_rating: Some(data.rating),
                    feedback_comments: data.feedback.clone(),
                    state_data: Some(transition_data.clone()),
                    action: Action::RateService.as_str().to_string(),
                    actor_id: Some(data.actor_id),
                    transition_data,
                    comments,
                    terminal: true,
                    ..Default::default()
                },
                &data.actor_id.to_string(),
            )
            .await?;

        self.notifications
            .dispatch(&NotificationIntent::Completion {
                client_id: request.client_id,
                request_id: request_id.to_string(),
                rating: Some(data.rating),
            })
            .await;

        info!(request_id, rating = data.rating, "workflow completed");
        Ok(())
    }

    /// Status snapshot: current position, available actions, reachable
    /// roles and the full transition history. Never advances state.
    pub async fn get_workflow_status(&self, request_id: &str) -> Result<WorkflowStatus> {
        let request = self
            .state_manager
            .get_request(request_id)
            .await?
            .ok_or_else(|| EngineError::RequestNotFound(request_id.to_string()))?;
        let definition = self.registry.definition(request.workflow_type);
        let history = self.state_manager.get_request_history(request_id).await?;

        Ok(WorkflowStatus {
            request_id: request_id.to_string(),
            current_role: request.current_role,
            current_status: request.current_status,
            available_actions: definition.available_actions(request.current_role),
            next_roles: definition.next_roles(request.current_role),
            history,
        })
    }
}

fn initiation_comment(data: &InitiationData) -> String {
    match &data.staff_creator {
        Some(creator) => {
            let client_name = if data.contact_info.full_name.is_empty() {
                "Unknown Client"
            } else {
                &data.contact_info.full_name
            };
            format!(
                "Workflow initiated by {role} on behalf of client {client_name} \
                 (Staff-created request by {role} for {client_name})",
                role = creator.creator_role,
            )
        }
        None => "Workflow initiated by client".to_string(),
    }
}

fn transition_comment(
    request: &ServiceRequest,
    action: Action,
    payload: &Map<String, Value>,
) -> String {
    let base = payload
        .get("comments")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Action: {action}"));
    match request.staff_comment_annotation() {
        Some(annotation) => format!("{base} ({annotation})"),
        None => base,
    }
}
