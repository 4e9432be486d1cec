// Workflow definitions - complete state machine specifications

//! # Workflow Registry
//!
//! This module defines the compiled-in workflow specifications. A
//! [`WorkflowDefinition`] is a complete multi-party state machine that
//! describes, per organizational role:
//! - which actions the role may trigger,
//! - which payload fields each action requires or accepts,
//! - the successor role per action (intermediate actions keep the same
//!   role and only record progress),
//! - the completion actions that terminate the workflow.
//!
//! The [`WorkflowRegistry`] holds the three workflows of the product:
//! connection installation, technical service and direct call-center
//! resolution. The set is fixed at compile time; there is no runtime
//! workflow authoring.
//!
//! Everything here is pure and stateless - no I/O, no clocks. The engine
//! layer consults the registry and the access-control rules before any
//! state is touched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::action::Action;
use super::role::{Role, WorkflowType};

/// One action a role may trigger, with its payload contract and successor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    pub action: Action,

    /// Payload fields that must be present for the action to apply.
    pub required_fields: Vec<String>,

    /// Payload fields the action understands but does not demand.
    pub optional_fields: Vec<String>,

    /// Role that takes over after the action. `None` marks an intermediate
    /// action: progress is recorded but the role keeps the request.
    pub next_role: Option<Role>,
}

impl ActionSpec {
    fn new(action: Action, next_role: Option<Role>) -> Self {
        ActionSpec {
            action,
            required_fields: Vec::new(),
            optional_fields: Vec::new(),
            next_role,
        }
    }

    fn required(mut self, fields: &[&str]) -> Self {
        self.required_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    fn optional(mut self, fields: &[&str]) -> Self {
        self.optional_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }
}

/// A (workflow, role) pair with its allowed actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub role: Role,
    pub actions: Vec<ActionSpec>,
}

impl WorkflowStep {
    fn new(role: Role, actions: Vec<ActionSpec>) -> Self {
        WorkflowStep { role, actions }
    }

    pub fn action_spec(&self, action: Action) -> Option<&ActionSpec> {
        self.actions.iter().find(|spec| spec.action == action)
    }

    pub fn allows(&self, action: Action) -> bool {
        self.action_spec(action).is_some()
    }
}

/// Successor computation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Successor {
    /// Role holding the request after the action (equal to the current role
    /// for intermediate actions).
    pub next_role: Role,
    /// Whether the action terminates the workflow.
    pub is_terminal: bool,
}

/// A complete workflow: step map, entry rule and completion actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub workflow_type: WorkflowType,
    pub name: String,

    /// Steps keyed by the role that owns them.
    pub steps: HashMap<Role, WorkflowStep>,

    /// The role that receives a freshly initiated request: the first
    /// non-client role of the diagram. The creator - client or staff -
    /// never occupies a workflow step themselves.
    pub initial_role: Role,

    /// Client submit action recorded on the initiation transition row.
    /// `None` for workflows without a client submit step; those record the
    /// literal `workflow_initiated` tag instead.
    pub entry_action: Option<Action>,

    /// Actions that terminate the workflow.
    pub completion_actions: Vec<Action>,
}

impl WorkflowDefinition {
    pub fn step(&self, role: Role) -> Option<&WorkflowStep> {
        self.steps.get(&role)
    }

    pub fn is_completion_action(&self, action: Action) -> bool {
        self.completion_actions.contains(&action)
    }

    /// Actions available to a role in this workflow.
    pub fn available_actions(&self, role: Role) -> Vec<Action> {
        self.step(role)
            .map(|step| step.actions.iter().map(|spec| spec.action).collect())
            .unwrap_or_default()
    }

    /// Roles reachable in one handoff from the given role.
    pub fn next_roles(&self, role: Role) -> Vec<Role> {
        let mut roles: Vec<Role> = self
            .step(role)
            .map(|step| {
                step.actions
                    .iter()
                    .filter_map(|spec| spec.next_role)
                    .collect()
            })
            .unwrap_or_default();
        roles.dedup();
        roles
    }

    /// Validate that every successor reference points at a defined step or
    /// at the client (who ends the workflow by rating).
    pub fn validate(&self) -> Result<(), String> {
        if self.step(self.initial_role).is_none() {
            return Err(format!(
                "workflow '{}': initial role '{}' has no step",
                self.workflow_type, self.initial_role
            ));
        }
        for step in self.steps.values() {
            for spec in &step.actions {
                if let Some(next) = spec.next_role {
                    if next != Role::Client && self.step(next).is_none() {
                        return Err(format!(
                            "workflow '{}': action '{}' hands off to '{}' which has no step",
                            self.workflow_type, spec.action, next
                        ));
                    }
                }
            }
        }
        if let Some(entry) = self.entry_action {
            let client_step = self
                .step(Role::Client)
                .ok_or_else(|| format!("workflow '{}': entry action without client step", self.workflow_type))?;
            let spec = client_step.action_spec(entry).ok_or_else(|| {
                format!(
                    "workflow '{}': entry action '{}' not on the client step",
                    self.workflow_type, entry
                )
            })?;
            if spec.next_role != Some(self.initial_role) {
                return Err(format!(
                    "workflow '{}': entry action '{}' does not hand off to the initial role",
                    self.workflow_type, entry
                ));
            }
        }
        Ok(())
    }

    /// Roles with a step that can never hold the request, starting from the
    /// initial role. Useful for workflow analysis; the compiled workflows
    /// have none.
    pub fn find_unreachable_roles(&self) -> Vec<Role> {
        let mut reachable = std::collections::HashSet::new();
        let mut to_visit = vec![self.initial_role];

        while let Some(role) = to_visit.pop() {
            if reachable.insert(role) {
                for next in self.next_roles(role) {
                    if !reachable.contains(&next) {
                        to_visit.push(next);
                    }
                }
            }
        }

        self.steps
            .keys()
            .copied()
            // The client step is the entry, not a routed-to step.
            .filter(|role| *role != Role::Client && !reachable.contains(role))
            .collect()
    }
}

/// Snapshot answer of the engine's status query: where a request stands
/// and what can happen next. Never advances state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub request_id: String,
    pub current_role: Role,
    pub current_status: super::role::RequestStatus,
    pub available_actions: Vec<Action>,
    pub next_roles: Vec<Role>,
    pub history: Vec<super::transition::StateTransition>,
}

/// The compiled-in workflow set.
#[derive(Debug, Clone)]
pub struct WorkflowRegistry {
    definitions: HashMap<WorkflowType, WorkflowDefinition>,
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        let mut definitions = HashMap::new();
        definitions.insert(
            WorkflowType::ConnectionRequest,
            Self::connection_request(),
        );
        definitions.insert(WorkflowType::TechnicalService, Self::technical_service());
        definitions.insert(WorkflowType::CallCenterDirect, Self::call_center_direct());
        WorkflowRegistry { definitions }
    }

    /// Connection installation:
    /// client submits, manager delegates to a junior manager who calls the
    /// client and forwards to the controller, the controller assigns a
    /// technician, the technician installs and documents equipment, the
    /// warehouse updates inventory and closes, the client rates.
    fn connection_request() -> WorkflowDefinition {
        let steps = HashMap::from([
            (
                Role::Client,
                WorkflowStep::new(
                    Role::Client,
                    vec![ActionSpec::new(Action::SubmitRequest, Some(Role::Manager))
                        .required(&["description", "location", "contact_info"])],
                ),
            ),
            (
                Role::Manager,
                WorkflowStep::new(
                    Role::Manager,
                    vec![ActionSpec::new(
                        Action::AssignToJuniorManager,
                        Some(Role::JuniorManager),
                    )
                    .required(&["junior_manager_id"])],
                ),
            ),
            (
                Role::JuniorManager,
                WorkflowStep::new(
                    Role::JuniorManager,
                    vec![
                        ActionSpec::new(Action::CallClient, None)
                            .required(&["call_notes"])
                            .optional(&["additional_comments"]),
                        ActionSpec::new(Action::ForwardToController, Some(Role::Controller))
                            .optional(&["additional_comments"]),
                    ],
                ),
            ),
            (
                Role::Controller,
                WorkflowStep::new(
                    Role::Controller,
                    vec![ActionSpec::new(
                        Action::AssignToTechnician,
                        Some(Role::Technician),
                    )
                    .required(&["technician_id"])],
                ),
            ),
            (
                Role::Technician,
                WorkflowStep::new(
                    Role::Technician,
                    vec![
                        ActionSpec::new(Action::StartInstallation, None)
                            .optional(&["installation_notes"]),
                        ActionSpec::new(Action::DocumentEquipment, Some(Role::Warehouse))
                            .required(&["equipment_used"])
                            .optional(&["installation_notes"]),
                    ],
                ),
            ),
            (
                Role::Warehouse,
                WorkflowStep::new(
                    Role::Warehouse,
                    vec![
                        ActionSpec::new(Action::UpdateInventory, None)
                            .required(&["inventory_updates"]),
                        ActionSpec::new(Action::CloseRequest, Some(Role::Client))
                            .optional(&["warehouse_comments"]),
                    ],
                ),
            ),
        ]);

        WorkflowDefinition {
            workflow_type: WorkflowType::ConnectionRequest,
            name: "Connection Request".to_string(),
            steps,
            initial_role: Role::Manager,
            entry_action: Some(Action::SubmitRequest),
            completion_actions: vec![Action::RateService],
        }
    }

    /// Technical service:
    /// client submits, controller assigns a technician, the technician
    /// diagnoses and decides on warehouse involvement - either resolving
    /// directly or looping through equipment preparation - then completes,
    /// and the client rates.
    fn technical_service() -> WorkflowDefinition {
        let steps = HashMap::from([
            (
                Role::Client,
                WorkflowStep::new(
                    Role::Client,
                    vec![ActionSpec::new(
                        Action::SubmitTechnicalRequest,
                        Some(Role::Controller),
                    )
                    .required(&["description", "issue_type"])],
                ),
            ),
            (
                Role::Controller,
                WorkflowStep::new(
                    Role::Controller,
                    vec![ActionSpec::new(
                        Action::AssignTechnicalToTechnician,
                        Some(Role::Technician),
                    )
                    .required(&["technician_id"])],
                ),
            ),
            (
                Role::Technician,
                WorkflowStep::new(
                    Role::Technician,
                    vec![
                        ActionSpec::new(Action::StartDiagnostics, None)
                            .optional(&["diagnostics_notes"]),
                        ActionSpec::new(Action::DecideWarehouseInvolvement, None)
                            .required(&["decision"]),
                        ActionSpec::new(Action::ResolveWithoutWarehouse, None)
                            .optional(&["resolution_comments"]),
                        ActionSpec::new(Action::RequestWarehouseSupport, Some(Role::Warehouse))
                            .optional(&["equipment_needed"]),
                        ActionSpec::new(Action::DocumentEquipment, Some(Role::Warehouse))
                            .required(&["equipment_used"]),
                        ActionSpec::new(Action::CompleteTechnicalService, Some(Role::Client))
                            .optional(&["resolution_comments"]),
                    ],
                ),
            ),
            (
                Role::Warehouse,
                WorkflowStep::new(
                    Role::Warehouse,
                    vec![
                        ActionSpec::new(Action::PrepareEquipment, None)
                            .required(&["equipment_prepared"]),
                        ActionSpec::new(Action::ConfirmEquipmentReady, Some(Role::Technician)),
                        ActionSpec::new(Action::UpdateInventory, Some(Role::Technician))
                            .optional(&["inventory_updates", "warehouse_comments"]),
                    ],
                ),
            ),
        ]);

        WorkflowDefinition {
            workflow_type: WorkflowType::TechnicalService,
            name: "Technical Service".to_string(),
            steps,
            initial_role: Role::Controller,
            entry_action: Some(Action::SubmitTechnicalRequest),
            completion_actions: vec![Action::RateService],
        }
    }

    /// Call-center direct resolution:
    /// the supervisor assigns an operator, the operator resolves remotely,
    /// the client rates. No client submit step - these requests are opened
    /// by the call center itself.
    fn call_center_direct() -> WorkflowDefinition {
        let steps = HashMap::from([
            (
                Role::CallCenterSupervisor,
                WorkflowStep::new(
                    Role::CallCenterSupervisor,
                    vec![ActionSpec::new(
                        Action::AssignToCallCenterOperator,
                        Some(Role::CallCenter),
                    )
                    .required(&["operator_id"])],
                ),
            ),
            (
                Role::CallCenter,
                WorkflowStep::new(
                    Role::CallCenter,
                    vec![ActionSpec::new(Action::ResolveRemotely, Some(Role::Client))
                        .required(&["resolution_notes"])],
                ),
            ),
        ]);

        WorkflowDefinition {
            workflow_type: WorkflowType::CallCenterDirect,
            name: "Call Center Direct Resolution".to_string(),
            steps,
            initial_role: Role::CallCenterSupervisor,
            entry_action: None,
            completion_actions: vec![Action::RateService],
        }
    }

    pub fn definition(&self, workflow_type: WorkflowType) -> &WorkflowDefinition {
        // The map is total over WorkflowType by construction.
        &self.definitions[&workflow_type]
    }

    pub fn available_workflows(&self) -> Vec<WorkflowType> {
        let mut types: Vec<_> = self.definitions.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    /// The role that receives a freshly initiated request of this type.
    pub fn initial_role(&self, workflow_type: WorkflowType) -> Role {
        self.definition(workflow_type).initial_role
    }

    /// Action tag recorded on the initiation transition row.
    pub fn initiation_action(&self, workflow_type: WorkflowType) -> String {
        self.definition(workflow_type)
            .entry_action
            .map(|a| a.as_str().to_string())
            .unwrap_or_else(|| "workflow_initiated".to_string())
    }

    /// Compute the successor of `(current_role, action)` in a workflow.
    ///
    /// Returns `None` when the registry does not declare the action for the
    /// role. Completion actions are terminal and keep the current role.
    pub fn successor(
        &self,
        workflow_type: WorkflowType,
        current_role: Role,
        action: Action,
    ) -> Option<Successor> {
        let definition = self.definition(workflow_type);
        if definition.is_completion_action(action) {
            return Some(Successor {
                next_role: current_role,
                is_terminal: true,
            });
        }
        let spec = definition.step(current_role)?.action_spec(action)?;
        Some(Successor {
            next_role: spec.next_role.unwrap_or(current_role),
            is_terminal: false,
        })
    }

    /// Check that every required payload field of the action is present.
    pub fn validate_payload(
        &self,
        workflow_type: WorkflowType,
        current_role: Role,
        action: Action,
        payload: &Map<String, Value>,
    ) -> Result<(), String> {
        let definition = self.definition(workflow_type);
        let spec = definition
            .step(current_role)
            .and_then(|step| step.action_spec(action))
            .ok_or_else(|| {
                format!(
                    "action '{}' not declared for role '{}' in workflow '{}'",
                    action, current_role, workflow_type
                )
            })?;
        for field in &spec.required_fields {
            if !payload.contains_key(field) {
                return Err(field.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiled_workflows_are_well_formed() {
        let registry = WorkflowRegistry::new();
        for workflow_type in WorkflowType::all() {
            let definition = registry.definition(workflow_type);
            assert!(definition.validate().is_ok(), "{workflow_type} invalid");
            assert!(
                definition.find_unreachable_roles().is_empty(),
                "{workflow_type} has unreachable roles"
            );
        }
    }

    #[test]
    fn initial_role_is_first_non_client_role() {
        let registry = WorkflowRegistry::new();
        assert_eq!(
            registry.initial_role(WorkflowType::ConnectionRequest),
            Role::Manager
        );
        assert_eq!(
            registry.initial_role(WorkflowType::TechnicalService),
            Role::Controller
        );
        assert_eq!(
            registry.initial_role(WorkflowType::CallCenterDirect),
            Role::CallCenterSupervisor
        );
    }

    #[test]
    fn connection_path_reaches_client_through_all_roles() {
        let registry = WorkflowRegistry::new();
        let wt = WorkflowType::ConnectionRequest;

        let hops = [
            (Role::Manager, Action::AssignToJuniorManager, Role::JuniorManager),
            (Role::JuniorManager, Action::ForwardToController, Role::Controller),
            (Role::Controller, Action::AssignToTechnician, Role::Technician),
            (Role::Technician, Action::DocumentEquipment, Role::Warehouse),
            (Role::Warehouse, Action::CloseRequest, Role::Client),
        ];
        for (role, action, expected) in hops {
            let successor = registry.successor(wt, role, action).unwrap();
            assert_eq!(successor.next_role, expected);
            assert!(!successor.is_terminal);
        }
    }

    #[test]
    fn intermediate_actions_keep_the_role() {
        let registry = WorkflowRegistry::new();

        let call = registry
            .successor(
                WorkflowType::ConnectionRequest,
                Role::JuniorManager,
                Action::CallClient,
            )
            .unwrap();
        assert_eq!(call.next_role, Role::JuniorManager);

        let diagnostics = registry
            .successor(
                WorkflowType::TechnicalService,
                Role::Technician,
                Action::StartDiagnostics,
            )
            .unwrap();
        assert_eq!(diagnostics.next_role, Role::Technician);
    }

    #[test]
    fn warehouse_loop_returns_to_technician() {
        let registry = WorkflowRegistry::new();
        let wt = WorkflowType::TechnicalService;

        let to_warehouse = registry
            .successor(wt, Role::Technician, Action::RequestWarehouseSupport)
            .unwrap();
        assert_eq!(to_warehouse.next_role, Role::Warehouse);

        let back = registry
            .successor(wt, Role::Warehouse, Action::ConfirmEquipmentReady)
            .unwrap();
        assert_eq!(back.next_role, Role::Technician);
    }

    #[test]
    fn completion_action_is_terminal() {
        let registry = WorkflowRegistry::new();
        let successor = registry
            .successor(
                WorkflowType::ConnectionRequest,
                Role::Client,
                Action::RateService,
            )
            .unwrap();
        assert!(successor.is_terminal);
    }

    #[test]
    fn undeclared_action_has_no_successor() {
        let registry = WorkflowRegistry::new();
        assert!(registry
            .successor(
                WorkflowType::ConnectionRequest,
                Role::Manager,
                Action::AssignToTechnician,
            )
            .is_none());
    }

    #[test]
    fn payload_validation_reports_missing_field() {
        let registry = WorkflowRegistry::new();
        let wt = WorkflowType::ConnectionRequest;

        let empty = Map::new();
        let missing = registry
            .validate_payload(wt, Role::Manager, Action::AssignToJuniorManager, &empty)
            .unwrap_err();
        assert_eq!(missing, "junior_manager_id");

        let mut payload = Map::new();
        payload.insert("junior_manager_id".to_string(), Value::from(2));
        assert!(registry
            .validate_payload(wt, Role::Manager, Action::AssignToJuniorManager, &payload)
            .is_ok());

        // Intermediate sibling requirements do not leak onto the handoff.
        assert!(registry
            .validate_payload(wt, Role::JuniorManager, Action::ForwardToController, &empty)
            .is_ok());
    }

    #[test]
    fn initiation_action_tags() {
        let registry = WorkflowRegistry::new();
        assert_eq!(
            registry.initiation_action(WorkflowType::ConnectionRequest),
            "submit_request"
        );
        assert_eq!(
            registry.initiation_action(WorkflowType::TechnicalService),
            "submit_technical_request"
        );
        assert_eq!(
            registry.initiation_action(WorkflowType::CallCenterDirect),
            "workflow_initiated"
        );
    }
}
