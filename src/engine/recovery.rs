// Stuck-workflow detection, admin recovery and system health

//! # Recovery Subsystem
//!
//! Workflows stall when a role sits on a request past the staleness
//! threshold. This module detects them, offers the admin the four recovery
//! options (force a transition, reset to the previous state, force-complete
//! with a neutral rating, reassign the acting user) and computes the system
//! health report the admin CLI surfaces.
//!
//! Recovery runs out-of-band over the same store as the engine; only
//! `force_transition` and `complete_workflow` move a request forward, and
//! both leave the same audit trail a regular transition would.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use crate::config::RecoveryConfig;
use crate::models::{
    Action, RequestStatus, Role, ServiceRequest, WorkflowType,
};
use crate::{EngineError, Result};

use super::state_manager::{EnhancedStateManager, StateManager, StateUpdate};
use super::workflow::{CompletionData, WorkflowEngine};

/// One stalled request, as reported to the admin.
#[derive(Debug, Clone)]
pub struct StuckWorkflow {
    pub request_id: String,
    pub workflow_type: WorkflowType,
    pub current_role: Role,
    pub stuck_duration_hours: i64,
    pub description_snippet: String,
}

/// Admin-invoked recovery actions.
#[derive(Debug, Clone)]
pub enum RecoveryOption {
    /// Move the request to an admin-chosen role.
    ForceTransition { target_role: Role },
    /// Pop the latest transition and restore its `from_role`.
    ResetToPreviousState,
    /// Terminal completion with a neutral rating and an admin note.
    CompleteWorkflow,
    /// Change the acting user without changing the role.
    ReassignRole { target_user_id: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Critical => "critical",
        }
    }
}

/// Snapshot of the engine's operational state.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub active_transactions: usize,
    pub pending_notification_retries: usize,
    pub errors_last_24h: usize,
    pub errors_by_category: HashMap<String, usize>,
    pub errors_by_severity: HashMap<String, usize>,
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
}

pub struct RecoverySystem {
    state_manager: Arc<StateManager>,
    enhanced: Arc<EnhancedStateManager>,
    engine: Arc<WorkflowEngine>,
    config: RecoveryConfig,
}

impl RecoverySystem {
    pub fn new(
        state_manager: Arc<StateManager>,
        enhanced: Arc<EnhancedStateManager>,
        engine: Arc<WorkflowEngine>,
        config: RecoveryConfig,
    ) -> Self {
        RecoverySystem {
            state_manager,
            enhanced,
            engine,
            config,
        }
    }

    /// In-progress requests with no update inside the staleness threshold
    /// of their workflow type, most-stale first.
    pub async fn detect_stuck(&self) -> Result<Vec<StuckWorkflow>> {
        let now = Utc::now();
        let in_progress = self
            .state_manager
            .get_requests_by_status(RequestStatus::InProgress)
            .await?;

        let mut stuck: Vec<StuckWorkflow> = in_progress
            .into_iter()
            .filter_map(|request| {
                let idle = now - request.updated_at;
                let threshold = self.config.stuck_threshold_for(request.workflow_type);
                if idle > threshold {
                    Some(StuckWorkflow {
                        request_id: request.id.clone(),
                        workflow_type: request.workflow_type,
                        current_role: request.current_role,
                        stuck_duration_hours: idle.num_hours(),
                        description_snippet: snippet(&request.description),
                    })
                } else {
                    None
                }
            })
            .collect();
        stuck.sort_by(|a, b| b.stuck_duration_hours.cmp(&a.stuck_duration_hours));

        if !stuck.is_empty() {
            warn!(count = stuck.len(), "stuck workflows detected");
        }
        Ok(stuck)
    }

    /// Roles an admin may force a request of this workflow onto.
    pub fn available_target_roles(&self, request: &ServiceRequest) -> Vec<Role> {
        let definition = self.engine.registry().definition(request.workflow_type);
        let mut roles: Vec<Role> = definition
            .steps
            .keys()
            .copied()
            .filter(|role| *role != request.current_role)
            .collect();
        roles.sort_by_key(|r| r.as_str());
        roles
    }

    /// Apply one recovery option as the given admin actor.
    #[instrument(skip(self, option), fields(request_id = %request_id))]
    pub async fn recover(
        &self,
        request_id: &str,
        option: RecoveryOption,
        admin_id: i64,
    ) -> Result<()> {
        let request = self
            .state_manager
            .get_request(request_id)
            .await?
            .ok_or_else(|| EngineError::RequestNotFound(request_id.to_string()))?;

        match option {
            RecoveryOption::ForceTransition { target_role } => {
                self.force_transition(&request, target_role, admin_id).await
            }
            RecoveryOption::ResetToPreviousState => {
                self.reset_to_previous_state(&request, admin_id).await
            }
            RecoveryOption::CompleteWorkflow => {
                self.engine
                    .complete_workflow(
                        request_id,
                        CompletionData {
                            rating: 3,
                            feedback: Some(format!(
                                "Workflow completed by admin recovery at {}",
                                Utc::now().format("%Y-%m-%d %H:%M")
                            )),
                            actor_id: admin_id,
                            actor_role: Role::Admin,
                        },
                    )
                    .await
            }
            RecoveryOption::ReassignRole { target_user_id } => {
                self.reassign_role(&request, target_user_id, admin_id).await
            }
        }
    }

    async fn force_transition(
        &self,
        request: &ServiceRequest,
        target_role: Role,
        admin_id: i64,
    ) -> Result<()> {
        let definition = self.engine.registry().definition(request.workflow_type);
        if target_role != Role::Client && definition.step(target_role).is_none() {
            return Err(EngineError::InvalidTransition(format!(
                "role {target_role} has no step in workflow {}",
                request.workflow_type
            )));
        }

        let mut data = Map::new();
        data.insert("recovered_by".to_string(), Value::from(admin_id));
        self.state_manager
            .update_request_state(
                &request.id,
                StateUpdate {
                    current_role: Some(target_role),
                    current_status: Some(RequestStatus::InProgress),
                    action: Action::AdminForceTransition.as_str().to_string(),
                    actor_id: Some(admin_id),
                    transition_data: data,
                    comments: format!("Forced to {target_role} by admin recovery"),
                    ..Default::default()
                },
                "admin",
            )
            .await?;
        info!(request_id = %request.id, target_role = %target_role, "forced transition");
        Ok(())
    }

    /// Pop the latest transition row and restore its `from_role`. The pop
    /// is the one sanctioned deletion from the audit log, reserved for
    /// admin recovery.
    async fn reset_to_previous_state(
        &self,
        request: &ServiceRequest,
        admin_id: i64,
    ) -> Result<()> {
        let history = self.state_manager.get_request_history(&request.id).await?;
        let last = history
            .last()
            .ok_or_else(|| EngineError::InvalidTransition("no transitions to reset".to_string()))?;
        let previous_role = last.from_role.ok_or_else(|| {
            EngineError::InvalidTransition(
                "cannot reset past the initiation transition".to_string(),
            )
        })?;

        self.state_manager.store().delete_transition(last.id).await?;

        let mut restored = request.clone();
        restored.current_role = previous_role;
        restored.updated_at = Utc::now();
        self.state_manager
            .store()
            .update_request(&restored, None)
            .await?;

        info!(
            request_id = %request.id,
            restored_role = %previous_role,
            admin_id,
            "reset to previous state"
        );
        Ok(())
    }

    /// Change the acting user; the role keeps the request. Recorded as a
    /// free-form annotation row, not a handoff.
    async fn reassign_role(
        &self,
        request: &ServiceRequest,
        target_user_id: i64,
        admin_id: i64,
    ) -> Result<()> {
        let mut data = Map::new();
        data.insert("assigned_user_id".to_string(), Value::from(target_user_id));
        self.state_manager
            .update_request_state(
                &request.id,
                StateUpdate {
                    state_data: Some(data.clone()),
                    ..Default::default()
                },
                "admin",
            )
            .await?;

        self.state_manager
            .record_state_transition(
                &request.id,
                Some(request.current_role),
                Some(request.current_role),
                "reassign_role",
                Some(admin_id),
                data,
                &format!("Reassigned to user {target_user_id} by admin recovery"),
            )
            .await?;
        Ok(())
    }

    /// Operational snapshot: open two-phase transactions, queued
    /// notification retries, and the last day of error records. Degraded at
    /// ten recent errors; critical when any critical-severity error landed
    /// in the last hour.
    pub async fn health(&self) -> Result<HealthReport> {
        let now = Utc::now();
        let errors = self
            .state_manager
            .store()
            .recent_error_records(now - chrono::Duration::hours(24))
            .await?;
        let retries = self.state_manager.store().list_retries().await?;

        let mut by_category: HashMap<String, usize> = HashMap::new();
        let mut by_severity: HashMap<String, usize> = HashMap::new();
        let mut critical_last_hour = false;
        for record in &errors {
            *by_category
                .entry(record.category.as_str().to_string())
                .or_default() += 1;
            *by_severity
                .entry(record.severity.as_str().to_string())
                .or_default() += 1;
            if record.severity == crate::models::ErrorSeverity::Critical
                && record.created_at >= now - chrono::Duration::hours(1)
            {
                critical_last_hour = true;
            }
        }

        let status = if critical_last_hour {
            HealthStatus::Critical
        } else if errors.len() >= 10 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Ok(HealthReport {
            active_transactions: self.enhanced.active_transaction_count(),
            pending_notification_retries: retries.len(),
            errors_last_24h: errors.len(),
            errors_by_category: by_category,
            errors_by_severity: by_severity,
            status,
            checked_at: now,
        })
    }
}

fn snippet(description: &str) -> String {
    const LIMIT: usize = 50;
    if description.chars().count() <= LIMIT {
        description.to_string()
    } else {
        description.chars().take(LIMIT).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::access::AccessControl;
    use crate::engine::inventory::InventoryManager;
    use crate::engine::notify::{NotificationSystem, NotificationTransport};
    use crate::engine::state_manager::CreateRequest;
    use crate::engine::storage::{InMemoryStore, Store};
    use crate::models::{
        ContactInfo, ErrorCategory, ErrorRecord, ErrorSeverity, NotificationIntent, Priority,
        WorkflowRegistry,
    };

    struct NullTransport;

    #[async_trait::async_trait]
    impl NotificationTransport for NullTransport {
        async fn deliver(&self, _intent: &NotificationIntent) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        state_manager: Arc<StateManager>,
        recovery: RecoverySystem,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let config = EngineConfig::default();
        let registry = Arc::new(WorkflowRegistry::new());
        let state_manager = Arc::new(StateManager::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&registry),
            &config,
        ));
        let enhanced = Arc::new(EnhancedStateManager::new(Arc::clone(&state_manager)));
        let notifications = Arc::new(NotificationSystem::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(NullTransport),
            config.notification.clone(),
        ));
        let inventory = Arc::new(InventoryManager::new(
            Arc::clone(&state_manager),
            Arc::clone(&notifications),
        ));
        let engine = Arc::new(WorkflowEngine::new(
            Arc::clone(&state_manager),
            registry,
            Arc::new(AccessControl::new(Arc::clone(&store) as Arc<dyn Store>)),
            notifications,
            inventory,
        ));
        let recovery = RecoverySystem::new(
            Arc::clone(&state_manager),
            enhanced,
            engine,
            config.recovery.clone(),
        );
        Fixture {
            store,
            state_manager,
            recovery,
        }
    }

    async fn stalled_request(fixture: &Fixture, hours_ago: i64) -> String {
        let id = fixture
            .state_manager
            .create_request(
                WorkflowType::ConnectionRequest,
                CreateRequest {
                    client_id: 1,
                    description: "install connection at the new office".to_string(),
                    location: "Tashkent".to_string(),
                    contact_info: ContactInfo::default(),
                    priority: Priority::Medium,
                    staff_creator: None,
                    initial_state_data: Map::new(),
                    actor_id: None,
                    initiation_comment: "Workflow initiated by client".to_string(),
                },
            )
            .await
            .unwrap();
        fixture
            .state_manager
            .update_request_state(
                &id,
                StateUpdate {
                    current_role: Some(Role::JuniorManager),
                    current_status: Some(RequestStatus::InProgress),
                    action: "assign_to_junior_manager".to_string(),
                    actor_id: Some(2),
                    comments: "Action: assign_to_junior_manager".to_string(),
                    ..Default::default()
                },
                "2",
            )
            .await
            .unwrap();

        // Age the request directly in the store.
        let mut request = fixture.state_manager.get_request(&id).await.unwrap().unwrap();
        request.updated_at = Utc::now() - chrono::Duration::hours(hours_ago);
        fixture.store.update_request(&request, None).await.unwrap();
        id
    }

    #[tokio::test]
    async fn stuck_detection_honors_the_threshold() {
        let fixture = fixture();
        let stale = stalled_request(&fixture, 30).await;
        let _fresh = stalled_request(&fixture, 1).await;

        let stuck = fixture.recovery.detect_stuck().await.unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].request_id, stale);
        assert_eq!(stuck[0].current_role, Role::JuniorManager);
        assert!(stuck[0].stuck_duration_hours >= 30);
        assert!(!stuck[0].description_snippet.is_empty());
    }

    #[tokio::test]
    async fn force_transition_writes_the_admin_audit_row() {
        let fixture = fixture();
        let id = stalled_request(&fixture, 30).await;

        fixture
            .recovery
            .recover(
                &id,
                RecoveryOption::ForceTransition {
                    target_role: Role::Controller,
                },
                99,
            )
            .await
            .unwrap();

        let request = fixture.state_manager.get_request(&id).await.unwrap().unwrap();
        assert_eq!(request.current_role, Role::Controller);

        let history = fixture.state_manager.get_request_history(&id).await.unwrap();
        let last = history.last().unwrap();
        assert_eq!(last.action, "admin_force_transition");
        assert_eq!(last.actor_id, Some(99));
        assert_eq!(last.from_role, Some(Role::JuniorManager));
        assert_eq!(last.to_role, Some(Role::Controller));
    }

    #[tokio::test]
    async fn reset_pops_the_latest_transition() {
        let fixture = fixture();
        let id = stalled_request(&fixture, 30).await;
        let before = fixture.state_manager.get_request_history(&id).await.unwrap();
        assert_eq!(before.len(), 2);

        fixture
            .recovery
            .recover(&id, RecoveryOption::ResetToPreviousState, 99)
            .await
            .unwrap();

        let request = fixture.state_manager.get_request(&id).await.unwrap().unwrap();
        assert_eq!(request.current_role, Role::Manager);
        let after = fixture.state_manager.get_request_history(&id).await.unwrap();
        assert_eq!(after.len(), 1);
        assert!(after[0].is_initiation());
    }

    #[tokio::test]
    async fn force_complete_sets_the_neutral_rating() {
        let fixture = fixture();
        let id = stalled_request(&fixture, 30).await;

        fixture
            .recovery
            .recover(&id, RecoveryOption::CompleteWorkflow, 99)
            .await
            .unwrap();

        let request = fixture.state_manager.get_request(&id).await.unwrap().unwrap();
        assert_eq!(request.current_status, RequestStatus::Completed);
        assert_eq!(request.completion_rating, Some(3));
    }

    #[tokio::test]
    async fn health_degrades_with_errors_and_goes_critical_fast() {
        let fixture = fixture();

        let report = fixture.recovery.health().await.unwrap();
        assert_eq!(report.status, HealthStatus::Healthy);

        for _ in 0..10 {
            fixture
                .store
                .insert_error_record(&ErrorRecord::new(
                    ErrorCategory::BusinessLogic,
                    ErrorSeverity::Low,
                    "denied",
                ))
                .await
                .unwrap();
        }
        let report = fixture.recovery.health().await.unwrap();
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.errors_last_24h, 10);

        fixture
            .store
            .insert_error_record(&ErrorRecord::new(
                ErrorCategory::System,
                ErrorSeverity::Critical,
                "invariant violated",
            ))
            .await
            .unwrap();
        let report = fixture.recovery.health().await.unwrap();
        assert_eq!(report.status, HealthStatus::Critical);
    }
}
