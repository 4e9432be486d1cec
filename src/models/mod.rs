// Core domain models for the service-request workflow engine

//! # Domain Models Module
//!
//! Pure domain data for the workflow engine: the stored enumerations, the
//! service request and its audit trail, staff-creation records, notification
//! intents and the compiled-in workflow registry. Nothing in this module
//! performs I/O; the engine layer owns persistence and orchestration.

pub mod action;
pub mod audit;
pub mod creation_flow;
pub mod error_record;
pub mod notification;
pub mod request;
pub mod role;
pub mod transition;
pub mod user;
pub mod workflow;

// Re-export main types for convenience
pub use action::Action;
pub use audit::{InventoryMovement, StaffApplicationAudit};
pub use creation_flow::{ClientSearchMethod, CreationFlowEvent, CreationFlowState};
pub use error_record::{ErrorCategory, ErrorRecord, ErrorSeverity};
pub use notification::{NotificationIntent, NotificationRetryEntry};
pub use request::{ContactInfo, EquipmentItem, ServiceRequest, StaffCreatorInfo, StateData};
pub use role::{Priority, RequestStatus, Role, WorkflowType};
pub use transition::StateTransition;
pub use user::User;
pub use workflow::{
    ActionSpec, Successor, WorkflowDefinition, WorkflowRegistry, WorkflowStatus, WorkflowStep,
};
