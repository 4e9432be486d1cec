// Engine layer - storage, orchestration and the background subsystems

//! # Engine Module
//!
//! Everything between the pure domain models and the outside world:
//!
//! - `storage` / `pg`: the [`Store`](storage::Store) trait with the
//!   in-memory and Postgres backends
//! - `state_manager`: the sole writer to the store, plus the enhanced
//!   two-phase variant
//! - `access`: the role capability matrix and per-request permission checks
//! - `workflow`: the top-level engine (initiate / transition / complete)
//! - `staff`: staff-on-behalf-of-client application creation
//! - `clients`: client validation, search and resolution
//! - `notify`: notification dispatch over the retry queue
//! - `inventory`: equipment consumption and reconciliation
//! - `recovery`: stuck-workflow detection, admin recovery, health
//!
//! Components are constructed leaf-first at startup (store, registry,
//! permissions, state manager, notifications, inventory, engine, staff
//! handler, recovery) with dependencies passed explicitly; there are no
//! global singletons.

pub mod access;
pub mod clients;
pub mod inventory;
pub mod notify;
pub mod pg;
pub mod recovery;
pub mod staff;
pub mod state_manager;
pub mod storage;
pub mod workflow;

pub use access::{AccessControl, RolePermissions};
pub use clients::{ClientResolver, ClientSearchResult, ClientValidator, NewClientData};
pub use inventory::{InventoryManager, ReconciliationReport};
pub use notify::{NotificationSystem, NotificationTransport};
pub use pg::PgStore;
pub use recovery::{HealthReport, HealthStatus, RecoveryOption, RecoverySystem, StuckWorkflow};
pub use staff::{ApplicationForm, CreatorContext, StaffApplicationHandler, SubmissionReceipt};
pub use state_manager::{CreateRequest, EnhancedStateManager, StateManager, StateUpdate};
pub use storage::{InMemoryStore, StockConsumption, Store};
pub use workflow::{CompletionData, InitiationData, WorkflowEngine};
