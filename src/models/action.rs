// Workflow action tags - the named transition triggers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named transition trigger declared by the workflow registry.
///
/// The tags serialize exactly as stored in the `state_transitions.action`
/// column. `AdminForceTransition` is recovery-only and never appears in a
/// registry step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    // Connection request
    SubmitRequest,
    AssignToJuniorManager,
    CallClient,
    ForwardToController,
    AssignToTechnician,
    StartInstallation,
    DocumentEquipment,
    UpdateInventory,
    CloseRequest,
    // Technical service
    SubmitTechnicalRequest,
    AssignTechnicalToTechnician,
    StartDiagnostics,
    DecideWarehouseInvolvement,
    ResolveWithoutWarehouse,
    RequestWarehouseSupport,
    PrepareEquipment,
    ConfirmEquipmentReady,
    CompleteTechnicalService,
    // Call center direct
    AssignToCallCenterOperator,
    ResolveRemotely,
    // Completion
    RateService,
    // Recovery
    AdminForceTransition,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::SubmitRequest => "submit_request",
            Action::AssignToJuniorManager => "assign_to_junior_manager",
            Action::CallClient => "call_client",
            Action::ForwardToController => "forward_to_controller",
            Action::AssignToTechnician => "assign_to_technician",
            Action::StartInstallation => "start_installation",
            Action::DocumentEquipment => "document_equipment",
            Action::UpdateInventory => "update_inventory",
            Action::CloseRequest => "close_request",
            Action::SubmitTechnicalRequest => "submit_technical_request",
            Action::AssignTechnicalToTechnician => "assign_technical_to_technician",
            Action::StartDiagnostics => "start_diagnostics",
            Action::DecideWarehouseInvolvement => "decide_warehouse_involvement",
            Action::ResolveWithoutWarehouse => "resolve_without_warehouse",
            Action::RequestWarehouseSupport => "request_warehouse_support",
            Action::PrepareEquipment => "prepare_equipment",
            Action::ConfirmEquipmentReady => "confirm_equipment_ready",
            Action::CompleteTechnicalService => "complete_technical_service",
            Action::AssignToCallCenterOperator => "assign_to_call_center_operator",
            Action::ResolveRemotely => "resolve_remotely",
            Action::RateService => "rate_service",
            Action::AdminForceTransition => "admin_force_transition",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submit_request" => Ok(Action::SubmitRequest),
            "assign_to_junior_manager" => Ok(Action::AssignToJuniorManager),
            "call_client" => Ok(Action::CallClient),
            "forward_to_controller" => Ok(Action::ForwardToController),
            "assign_to_technician" => Ok(Action::AssignToTechnician),
            "start_installation" => Ok(Action::StartInstallation),
            "document_equipment" => Ok(Action::DocumentEquipment),
            "update_inventory" => Ok(Action::UpdateInventory),
            "close_request" => Ok(Action::CloseRequest),
            "submit_technical_request" => Ok(Action::SubmitTechnicalRequest),
            "assign_technical_to_technician" => Ok(Action::AssignTechnicalToTechnician),
            "start_diagnostics" => Ok(Action::StartDiagnostics),
            "decide_warehouse_involvement" => Ok(Action::DecideWarehouseInvolvement),
            "resolve_without_warehouse" => Ok(Action::ResolveWithoutWarehouse),
            "request_warehouse_support" => Ok(Action::RequestWarehouseSupport),
            "prepare_equipment" => Ok(Action::PrepareEquipment),
            "confirm_equipment_ready" => Ok(Action::ConfirmEquipmentReady),
            "complete_technical_service" => Ok(Action::CompleteTechnicalService),
            "assign_to_call_center_operator" => Ok(Action::AssignToCallCenterOperator),
            "resolve_remotely" => Ok(Action::ResolveRemotely),
            "rate_service" => Ok(Action::RateService),
            "admin_force_transition" => Ok(Action::AdminForceTransition),
            other => Err(format!("unknown action: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_tags_round_trip() {
        let actions = [
            Action::SubmitRequest,
            Action::DecideWarehouseInvolvement,
            Action::AssignToCallCenterOperator,
            Action::RateService,
            Action::AdminForceTransition,
        ];
        for action in actions {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
    }
}
