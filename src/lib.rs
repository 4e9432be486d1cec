// Service Desk - service-request workflow engine
// Routes telecom service requests across organizational roles

//! # Service Desk Library
//!
//! This is the main library crate for the service-request workflow engine.
//! The engine is the authoritative backend over a single relational store:
//! it encodes the compiled-in workflows, enforces per-role permissions,
//! preserves an append-only audit trail, coordinates notifications to
//! successor actors, tracks staff-created applications, reconciles equipment
//! inventory and recovers stuck workflows.
//!
//! ## Core Components
//!
//! ### Domain Models (`models`)
//! - [`ServiceRequest`]: the unit the engine routes
//! - [`StateTransition`]: one append-only audit row per applied action
//! - [`WorkflowRegistry`]: the three compiled-in workflow definitions
//! - [`Role`] / [`WorkflowType`] / [`RequestStatus`] / [`Priority`] /
//!   [`Action`]: the stored enumeration tags
//!
//! ### Engine Layer (`engine`)
//! - [`Store`]: storage abstraction with in-memory and Postgres backends
//! - [`StateManager`]: sole writer to the store, transactional updates
//! - [`AccessControl`]: static role checks joined with per-request rules
//! - [`WorkflowEngine`]: initiate / transition / complete orchestration
//! - [`StaffApplicationHandler`]: staff-on-behalf-of-client creation
//! - [`NotificationSystem`]: intent fan-out over a retry queue
//! - [`RecoverySystem`]: stuck-workflow detection and admin recovery
//!
//! The UI surface (chat keyboards, localisation, message transport) lives
//! outside this crate: callers hand the engine an actor id and role, and the
//! engine hands back notification intents for an external gateway to
//! deliver.

pub mod config;
pub mod engine;
pub mod models;

// Re-export core domain types for easy access
pub use models::{
    Action, ContactInfo, CreationFlowEvent, CreationFlowState, EquipmentItem, ErrorCategory,
    ErrorRecord, ErrorSeverity, NotificationIntent, NotificationRetryEntry, Priority,
    RequestStatus, Role, ServiceRequest, StaffApplicationAudit, StaffCreatorInfo, StateData,
    StateTransition, User, WorkflowDefinition, WorkflowRegistry, WorkflowStatus, WorkflowStep,
    WorkflowType,
};

// Re-export engine types for convenience
pub use engine::{
    access::{AccessControl, RolePermissions},
    clients::{ClientResolver, ClientSearchResult, ClientValidator, NewClientData},
    inventory::{InventoryManager, ReconciliationReport},
    notify::{NotificationSystem, NotificationTransport},
    pg::PgStore,
    recovery::{HealthReport, HealthStatus, RecoveryOption, RecoverySystem, StuckWorkflow},
    staff::{ApplicationForm, CreatorContext, StaffApplicationHandler, SubmissionReceipt},
    state_manager::{CreateRequest, EnhancedStateManager, StateManager, StateUpdate},
    storage::{InMemoryStore, Store},
    workflow::{CompletionData, InitiationData, WorkflowEngine},
};

pub use config::EngineConfig;

use models::{ErrorCategory as Category, ErrorSeverity as Severity};
use thiserror::Error;

/// Crate error type covering the full failure taxonomy.
///
/// Every failure the engine can surface is one of these variants; the
/// [`EngineError::category`] and [`EngineError::severity`] mappings classify
/// each variant for the error-record log. Nothing is silently swallowed
/// except notification delivery failures, which are captured by the retry
/// queue instead of propagating.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Store deadline, lock contention or transport timeout. Retried with
    /// exponential backoff; never surfaced to the caller on retry success.
    #[error("transient failure: {0}")]
    Transient(String),

    /// No request with the given id.
    #[error("request not found: {0}")]
    RequestNotFound(String),

    /// No user with the given id.
    #[error("user not found: {0}")]
    UserNotFound(i64),

    /// The workflow type is not one of the compiled-in definitions.
    #[error("unknown workflow type: {0}")]
    UnknownWorkflow(String),

    /// Access control denied the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The registry does not declare this action for the request's current
    /// role.
    #[error("action '{action}' not allowed for role '{role}'")]
    ActionNotAllowed { role: String, action: String },

    /// The requested state change would violate the workflow graph.
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    /// Input validation failure (phone format, name length, missing payload
    /// field, rating range). Returned to the caller; never retried.
    #[error("validation failed for '{field}': {reason}")]
    ValidationFailed { field: String, reason: String },

    /// Staff creator hit the per-role daily creation cap.
    #[error("daily application limit exceeded: {count}/{limit}")]
    DailyLimitExceeded { count: u32, limit: u32 },

    /// Stock shortage during equipment consumption. Non-fatal to the
    /// workflow but escalated to the warehouse.
    #[error("insufficient stock for '{item}': requested {requested}, available {available}")]
    InventoryShortage {
        item: String,
        requested: u32,
        available: u32,
    },

    /// Delivery failure from the external notification transport.
    #[error("notification delivery failed: {0}")]
    NotificationFailed(String),

    /// Unexpected invariant violation. Logged at critical severity and
    /// surfaced as a generic failure.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// JSON serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage backend errors that are not classified as transient.
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    /// Error-record category for this failure.
    pub fn category(&self) -> Category {
        match self {
            EngineError::Transient(_) => Category::Transient,
            EngineError::RequestNotFound(_)
            | EngineError::UserNotFound(_)
            | EngineError::ValidationFailed { .. } => Category::Data,
            EngineError::UnknownWorkflow(_)
            | EngineError::PermissionDenied(_)
            | EngineError::ActionNotAllowed { .. }
            | EngineError::InvalidTransition(_)
            | EngineError::DailyLimitExceeded { .. } => Category::BusinessLogic,
            EngineError::InventoryShortage { .. } => Category::Inventory,
            EngineError::NotificationFailed(_) => Category::Notification,
            EngineError::Invariant(_) | EngineError::Serialization(_) | EngineError::Storage(_) => {
                Category::System
            }
        }
    }

    /// Error-record severity for this failure.
    pub fn severity(&self) -> Severity {
        match self {
            EngineError::Invariant(_) => Severity::Critical,
            EngineError::Serialization(_) | EngineError::Storage(_) => Severity::High,
            EngineError::Transient(_) | EngineError::InventoryShortage { .. } => Severity::Medium,
            _ => Severity::Low,
        }
    }

    /// Whether the operation that produced this error may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                EngineError::Transient(err.to_string())
            }
            other => EngineError::Storage(other.into()),
        }
    }
}

/// Type alias for Results that use the crate error type.
pub type Result<T> = std::result::Result<T, EngineError>;
