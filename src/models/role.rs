// Stored enumeration tags - roles, workflow types, statuses, priorities

//! # Core Enumerations
//!
//! The stored tags of the engine: organizational roles, the compiled-in
//! workflow types, request statuses and priorities. Tags serialize exactly
//! as they are persisted in the store (`snake_case`), and every enum offers
//! `as_str` / `parse` round-trips for the text columns of the schema.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Organizational role that owns workflow steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Manager,
    JuniorManager,
    Controller,
    Technician,
    Warehouse,
    CallCenter,
    CallCenterSupervisor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Manager => "manager",
            Role::JuniorManager => "junior_manager",
            Role::Controller => "controller",
            Role::Technician => "technician",
            Role::Warehouse => "warehouse",
            Role::CallCenter => "call_center",
            Role::CallCenterSupervisor => "call_center_supervisor",
            Role::Admin => "admin",
        }
    }

    /// All roles, in hierarchy order.
    pub fn all() -> [Role; 9] {
        [
            Role::Client,
            Role::Manager,
            Role::JuniorManager,
            Role::Controller,
            Role::Technician,
            Role::Warehouse,
            Role::CallCenter,
            Role::CallCenterSupervisor,
            Role::Admin,
        ]
    }

    /// Staff roles are every role except the client.
    pub fn is_staff(&self) -> bool {
        !matches!(self, Role::Client)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Role::Client),
            "manager" => Ok(Role::Manager),
            "junior_manager" => Ok(Role::JuniorManager),
            "controller" => Ok(Role::Controller),
            "technician" => Ok(Role::Technician),
            "warehouse" => Ok(Role::Warehouse),
            "call_center" => Ok(Role::CallCenter),
            "call_center_supervisor" => Ok(Role::CallCenterSupervisor),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Compiled-in request categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    ConnectionRequest,
    TechnicalService,
    CallCenterDirect,
}

impl WorkflowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowType::ConnectionRequest => "connection_request",
            WorkflowType::TechnicalService => "technical_service",
            WorkflowType::CallCenterDirect => "call_center_direct",
        }
    }

    pub fn all() -> [WorkflowType; 3] {
        [
            WorkflowType::ConnectionRequest,
            WorkflowType::TechnicalService,
            WorkflowType::CallCenterDirect,
        ]
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connection_request" => Ok(WorkflowType::ConnectionRequest),
            "technical_service" => Ok(WorkflowType::TechnicalService),
            "call_center_direct" => Ok(WorkflowType::CallCenterDirect),
            other => Err(format!("unknown workflow type: {other}")),
        }
    }
}

/// Request lifecycle status. A request never regresses from a terminal
/// status back to `in_progress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Created,
    InProgress,
    Completed,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Created => "created",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Completed => "completed",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    /// Completed and cancelled requests accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(RequestStatus::Created),
            "in_progress" => Ok(RequestStatus::InProgress),
            "completed" => Ok(RequestStatus::Completed),
            "cancelled" => Ok(RequestStatus::Cancelled),
            other => Err(format!("unknown request status: {other}")),
        }
    }
}

/// Request priority. Role work queues order priority-desc, then
/// oldest-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    /// Sort rank; higher is more urgent.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Medium => 1,
            Priority::High => 2,
            Priority::Urgent => 3,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_tags_round_trip() {
        for role in Role::all() {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert_eq!(
            serde_json::to_string(&Role::CallCenterSupervisor).unwrap(),
            "\"call_center_supervisor\""
        );
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::Urgent.rank() > Priority::High.rank());
        assert!(Priority::High.rank() > Priority::Medium.rank());
        assert!(Priority::Medium.rank() > Priority::Low.rank());
    }

    #[test]
    fn terminal_statuses() {
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
        assert!(!RequestStatus::InProgress.is_terminal());
        assert!(!RequestStatus::Created.is_terminal());
    }
}
