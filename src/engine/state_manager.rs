// State manager - sole writer to the store

//! # State Manager
//!
//! All request mutations flow through the [`StateManager`]: request creation
//! (request row + initiation transition in one store transaction), state
//! updates (re-read, dict-union merge of `state_data`, conditional paired
//! transition row) and the snapshot read queries. Every store call carries a
//! deadline; deadline expiry surfaces as a transient error, and transient
//! write failures are retried with exponential backoff (base 1 s, at most 3
//! attempts). A failed attempt writes nothing, so retries can never
//! duplicate audit rows.
//!
//! [`EnhancedStateManager`] layers the two-phase transaction API on top: a
//! process-local map of open transactions with recorded forward/rollback
//! operations. The map is rebuilt empty at startup - in-flight two-phase
//! transactions do not survive a restart and count as rolled back.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::models::{
    ContactInfo, EquipmentItem, Priority, RequestStatus, Role, ServiceRequest, StaffCreatorInfo,
    StateTransition, WorkflowRegistry, WorkflowType,
};
use crate::{EngineError, Result};

use super::storage::Store;

/// Input bundle for [`StateManager::create_request`].
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub client_id: i64,
    pub description: String,
    pub location: String,
    pub contact_info: ContactInfo,
    pub priority: Priority,
    /// Present when a staff member creates the request on behalf of the
    /// client.
    pub staff_creator: Option<StaffCreatorInfo>,
    /// Action-supplied fields seeded into `state_data` at creation.
    pub initial_state_data: Map<String, Value>,
    /// Actor recorded on the initiation transition row; defaults to the
    /// client.
    pub actor_id: Option<i64>,
    /// Comment recorded on the initiation transition row.
    pub initiation_comment: String,
}

/// One state change applied by [`StateManager::update_request_state`].
///
/// `None` fields keep the stored value. When the change moves `current_role`
/// or `current_status`, the paired transition row is built from `action`,
/// `actor_id`, `transition_data` and `comments`.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub current_role: Option<Role>,
    pub current_status: Option<RequestStatus>,
    pub priority: Option<Priority>,
    /// Merged into the stored bag, new keys win.
    pub state_data: Option<Map<String, Value>>,
    pub equipment_used: Option<Vec<EquipmentItem>>,
    pub inventory_updated: Option<bool>,
    pub completion_rating: Option<u8>,
    pub feedback_comments: Option<String>,
    pub client_notified_at: Option<chrono::DateTime<Utc>>,
    pub action: String,
    pub actor_id: Option<i64>,
    pub transition_data: Map<String, Value>,
    pub comments: String,
    /// Terminal changes record `to_role = None` on their transition row.
    pub terminal: bool,
    /// Append the transition row even when neither role nor status moved.
    /// The engine sets this for workflow actions so intermediate actions
    /// (same role, progress only) still land in the audit log.
    pub always_record: bool,
}

/// Sole writer to the store; owns deadlines and transient-retry policy.
pub struct StateManager {
    store: Arc<dyn Store>,
    registry: Arc<WorkflowRegistry>,
    store_timeout: Duration,
    max_write_attempts: u32,
    write_retry_base: Duration,
}

impl StateManager {
    pub fn new(store: Arc<dyn Store>, registry: Arc<WorkflowRegistry>, config: &EngineConfig) -> Self {
        StateManager {
            store,
            registry,
            store_timeout: config.store_timeout(),
            max_write_attempts: config.max_write_attempts.max(1),
            write_retry_base: config.write_retry_base(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<WorkflowRegistry> {
        &self.registry
    }

    /// Apply the configured deadline to one store call.
    async fn with_deadline<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Transient(format!(
                "store call exceeded {:?} deadline",
                self.store_timeout
            ))),
        }
    }

    /// Run a write, retrying transient failures with exponential backoff.
    /// Each attempt re-runs the whole closure; nothing is committed by a
    /// failed attempt.
    async fn retry_write<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match self.with_deadline(op()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt + 1 < self.max_write_attempts => {
                    let delay = self.write_retry_base * 2u32.saturating_pow(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "transient store failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        error!(operation, attempts = attempt + 1, "write failed after retries");
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Create a request with its initiation transition row. Returns the new
    /// request id.
    pub async fn create_request(
        &self,
        workflow_type: WorkflowType,
        data: CreateRequest,
    ) -> Result<String> {
        let initial_role = self.registry.initial_role(workflow_type);

        let mut request = ServiceRequest::new(
            workflow_type,
            data.client_id,
            initial_role,
            data.description,
            data.location,
            data.contact_info,
            data.priority,
        );
        if let Some(creator) = &data.staff_creator {
            request.mark_staff_created(creator);
        }
        request.state_data.merge(&data.initial_state_data);

        let initiation = StateTransition::new(
            request.id.clone(),
            None,
            Some(initial_role),
            self.registry.initiation_action(workflow_type),
            data.actor_id.or(Some(data.client_id)),
            data.initial_state_data.clone(),
            data.initiation_comment.clone(),
        );

        self.retry_write("create_request", || {
            let request = request.clone();
            let initiation = initiation.clone();
            let store = Arc::clone(&self.store);
            async move { store.insert_request(&request, &initiation).await }
        })
        .await?;

        info!(
            request_id = %request.id,
            workflow_type = %workflow_type,
            initial_role = %initial_role,
            "created request"
        );
        Ok(request.id)
    }

    /// Apply one state change. Within a single store transaction the current
    /// request is re-read, the change is merged, and - when the role or
    /// status moved - the paired transition row is appended. Failures leave
    /// the request untouched.
    pub async fn update_request_state(
        &self,
        request_id: &str,
        update: StateUpdate,
        actor_tag: &str,
    ) -> Result<()> {
        let actor_tag = actor_tag.to_string();
        self.retry_write("update_request_state", || {
            let update = update.clone();
            let actor_tag = actor_tag.clone();
            let store = Arc::clone(&self.store);
            let request_id = request_id.to_string();
            async move {
                let mut request = store
                    .get_request(&request_id)
                    .await?
                    .ok_or_else(|| EngineError::RequestNotFound(request_id.clone()))?;

                let old_role = request.current_role;
                let old_status = request.current_status;

                let new_status = update.current_status.unwrap_or(old_status);
                if old_status.is_terminal() && new_status == RequestStatus::InProgress {
                    return Err(EngineError::InvalidTransition(format!(
                        "request {request_id} is {old_status} and cannot return to in_progress"
                    )));
                }

                if let Some(role) = update.current_role {
                    request.current_role = role;
                }
                request.current_status = new_status;
                if let Some(priority) = update.priority {
                    request.priority = priority;
                }
                if let Some(data) = &update.state_data {
                    request.state_data.merge(data);
                }
                if let Some(equipment) = update.equipment_used {
                    request.equipment_used = equipment;
                }
                if let Some(flag) = update.inventory_updated {
                    request.inventory_updated = flag;
                }
                if let Some(rating) = update.completion_rating {
                    request.completion_rating = Some(rating);
                }
                if let Some(feedback) = update.feedback_comments {
                    request.feedback_comments = Some(feedback);
                }
                if let Some(at) = update.client_notified_at {
                    request.client_notified_at = Some(at);
                }
                request.updated_at = Utc::now();

                let transition = if request.current_role != old_role
                    || new_status != old_status
                    || update.always_record
                {
                    let comments = if update.comments.is_empty() {
                        format!("State updated by {actor_tag}")
                    } else {
                        update.comments.clone()
                    };
                    Some(StateTransition::new(
                        request_id.clone(),
                        Some(old_role),
                        if update.terminal {
                            None
                        } else {
                            Some(request.current_role)
                        },
                        if update.action.is_empty() {
                            "state_updated".to_string()
                        } else {
                            update.action.clone()
                        },
                        update.actor_id,
                        update.transition_data.clone(),
                        comments,
                    ))
                } else {
                    None
                };

                store.update_request(&request, transition.as_ref()).await?;
                debug!(request_id = %request_id, actor = %actor_tag, "updated request state");
                Ok(())
            }
        })
        .await
    }

    pub async fn get_request(&self, request_id: &str) -> Result<Option<ServiceRequest>> {
        self.with_deadline(self.store.get_request(request_id)).await
    }

    /// Complete transition log of a request, ordered `(created_at, id)`.
    pub async fn get_request_history(&self, request_id: &str) -> Result<Vec<StateTransition>> {
        self.with_deadline(self.store.list_transitions(request_id))
            .await
    }

    /// Work queue of a role: priority-desc, then oldest-first.
    pub async fn get_requests_by_role(
        &self,
        role: Role,
        status_filter: Option<RequestStatus>,
    ) -> Result<Vec<ServiceRequest>> {
        self.with_deadline(self.store.list_requests_by_role(role, status_filter))
            .await
    }

    pub async fn get_requests_by_client(&self, client_id: i64) -> Result<Vec<ServiceRequest>> {
        self.with_deadline(self.store.list_requests_by_client(client_id))
            .await
    }

    pub async fn get_requests_by_status(
        &self,
        status: RequestStatus,
    ) -> Result<Vec<ServiceRequest>> {
        self.with_deadline(self.store.list_requests_by_status(status))
            .await
    }

    /// Free-form audit row outside a state change (recovery annotations).
    pub async fn record_state_transition(
        &self,
        request_id: &str,
        from_role: Option<Role>,
        to_role: Option<Role>,
        action: &str,
        actor_id: Option<i64>,
        transition_data: Map<String, Value>,
        comments: &str,
    ) -> Result<i64> {
        let transition = StateTransition::new(
            request_id,
            from_role,
            to_role,
            action,
            actor_id,
            transition_data,
            comments,
        );
        self.retry_write("record_state_transition", || {
            let transition = transition.clone();
            let store = Arc::clone(&self.store);
            async move { store.append_transition(&transition).await }
        })
        .await
    }

    /// Admin cleanup: delete a request and its transition log.
    pub async fn delete_request(&self, request_id: &str) -> Result<bool> {
        self.with_deadline(self.store.delete_request(request_id))
            .await
    }
}

/// One recorded operation of an open two-phase transaction.
#[derive(Debug, Clone)]
pub struct TransactionOp {
    pub name: String,
    pub forward_data: Value,
    pub rollback_data: Value,
}

/// An open two-phase transaction.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    pub id: Uuid,
    pub operations: Vec<TransactionOp>,
    pub started_at: chrono::DateTime<Utc>,
}

/// State manager with a two-phase transaction API layered on top.
///
/// The active-transaction map is process-local and rebuilt empty at
/// startup: transactions that were in flight when the process died must
/// have already committed in the store or are treated as rolled back.
pub struct EnhancedStateManager {
    inner: Arc<StateManager>,
    active: DashMap<Uuid, TransactionContext>,
}

impl EnhancedStateManager {
    pub fn new(inner: Arc<StateManager>) -> Self {
        EnhancedStateManager {
            inner,
            active: DashMap::new(),
        }
    }

    pub fn inner(&self) -> &Arc<StateManager> {
        &self.inner
    }

    /// Open transactions, for the health report.
    pub fn active_transaction_count(&self) -> usize {
        self.active.len()
    }

    pub fn begin_transaction(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.active.insert(
            id,
            TransactionContext {
                id,
                operations: Vec::new(),
                started_at: Utc::now(),
            },
        );
        debug!(transaction_id = %id, "began transaction");
        id
    }

    pub fn add_operation(
        &self,
        transaction_id: Uuid,
        name: &str,
        forward_data: Value,
        rollback_data: Value,
    ) -> Result<()> {
        let mut context = self.active.get_mut(&transaction_id).ok_or_else(|| {
            EngineError::InvalidTransition(format!("unknown transaction {transaction_id}"))
        })?;
        context.operations.push(TransactionOp {
            name: name.to_string(),
            forward_data,
            rollback_data,
        });
        Ok(())
    }

    /// Close a transaction whose forward operations all succeeded.
    pub fn commit_transaction(&self, transaction_id: Uuid) -> Result<()> {
        self.active.remove(&transaction_id).ok_or_else(|| {
            EngineError::InvalidTransition(format!("unknown transaction {transaction_id}"))
        })?;
        debug!(transaction_id = %transaction_id, "committed transaction");
        Ok(())
    }

    /// Undo the recorded operations in reverse order and close the
    /// transaction.
    pub async fn rollback_transaction(&self, transaction_id: Uuid) -> Result<()> {
        let (_, context) = self.active.remove(&transaction_id).ok_or_else(|| {
            EngineError::InvalidTransition(format!("unknown transaction {transaction_id}"))
        })?;

        for op in context.operations.iter().rev() {
            match op.name.as_str() {
                "create_request" => {
                    if let Some(request_id) =
                        op.rollback_data.get("request_id").and_then(Value::as_str)
                    {
                        self.inner.delete_request(request_id).await?;
                    }
                }
                "update_request_state" => {
                    if let Some(previous) = op.rollback_data.get("previous_state") {
                        let request: ServiceRequest =
                            serde_json::from_value(previous.clone())?;
                        self.inner
                            .store()
                            .update_request(&request, None)
                            .await?;
                    }
                }
                other => {
                    warn!(operation = other, "no rollback handler; skipping");
                }
            }
        }
        info!(transaction_id = %transaction_id, "rolled back transaction");
        Ok(())
    }

    /// Create a request under a two-phase transaction: on failure the
    /// partially created request is removed.
    pub async fn create_request_with_transaction(
        &self,
        workflow_type: WorkflowType,
        data: CreateRequest,
    ) -> Result<String> {
        let transaction_id = self.begin_transaction();

        match self.inner.create_request(workflow_type, data).await {
            Ok(request_id) => {
                self.add_operation(
                    transaction_id,
                    "create_request",
                    Value::Null,
                    serde_json::json!({ "request_id": request_id }),
                )?;
                self.commit_transaction(transaction_id)?;
                Ok(request_id)
            }
            Err(err) => {
                self.rollback_transaction(transaction_id).await?;
                Err(err)
            }
        }
    }

    /// Update request state under a two-phase transaction: the prior
    /// snapshot is restored on failure.
    pub async fn update_request_state_with_transaction(
        &self,
        request_id: &str,
        update: StateUpdate,
        actor_tag: &str,
    ) -> Result<()> {
        let previous = self
            .inner
            .get_request(request_id)
            .await?
            .ok_or_else(|| EngineError::RequestNotFound(request_id.to_string()))?;

        let transaction_id = self.begin_transaction();
        self.add_operation(
            transaction_id,
            "update_request_state",
            Value::Null,
            serde_json::json!({ "previous_state": serde_json::to_value(&previous)? }),
        )?;

        match self
            .inner
            .update_request_state(request_id, update, actor_tag)
            .await
        {
            Ok(()) => {
                self.commit_transaction(transaction_id)?;
                Ok(())
            }
            Err(err) => {
                self.rollback_transaction(transaction_id).await?;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::storage::InMemoryStore;

    fn manager() -> StateManager {
        StateManager::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(WorkflowRegistry::new()),
            &EngineConfig::default(),
        )
    }

    fn create_data(client_id: i64) -> CreateRequest {
        CreateRequest {
            client_id,
            description: "install".to_string(),
            location: "Tashkent".to_string(),
            contact_info: ContactInfo {
                full_name: "Ahmad Karimov".to_string(),
                phone: "+998901234567".to_string(),
                address: None,
            },
            priority: Priority::Medium,
            staff_creator: None,
            initial_state_data: Map::new(),
            actor_id: None,
            initiation_comment: "Workflow initiated by client".to_string(),
        }
    }

    #[tokio::test]
    async fn create_derives_initial_role_and_writes_initiation_row() {
        let manager = manager();
        let id = manager
            .create_request(WorkflowType::ConnectionRequest, create_data(1))
            .await
            .unwrap();

        let request = manager.get_request(&id).await.unwrap().unwrap();
        assert_eq!(request.current_role, Role::Manager);
        assert_eq!(request.current_status, RequestStatus::Created);

        let history = manager.get_request_history(&id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].is_initiation());
        assert_eq!(history[0].action, "submit_request");
        assert_eq!(history[0].to_role, Some(Role::Manager));
    }

    #[tokio::test]
    async fn update_appends_row_only_on_role_or_status_change() {
        let manager = manager();
        let id = manager
            .create_request(WorkflowType::ConnectionRequest, create_data(1))
            .await
            .unwrap();

        // Pure data merge: no transition row.
        let mut data = Map::new();
        data.insert("note".to_string(), Value::from("checked"));
        manager
            .update_request_state(
                &id,
                StateUpdate {
                    state_data: Some(data),
                    ..Default::default()
                },
                "system",
            )
            .await
            .unwrap();
        assert_eq!(manager.get_request_history(&id).await.unwrap().len(), 1);

        // Role handoff: one new row.
        manager
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

        let history = manager.get_request_history(&id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].from_role, Some(Role::Manager));
        assert_eq!(history[1].to_role, Some(Role::JuniorManager));
    }

    #[tokio::test]
    async fn completed_request_cannot_regress_to_in_progress() {
        let manager = manager();
        let id = manager
            .create_request(WorkflowType::ConnectionRequest, create_data(1))
            .await
            .unwrap();

        manager
            .update_request_state(
                &id,
                StateUpdate {
                    current_status: Some(RequestStatus::Completed),
                    action: "rate_service".to_string(),
                    comments: "Workflow completed".to_string(),
                    ..Default::default()
                },
                "1",
            )
            .await
            .unwrap();

        let err = manager
            .update_request_state(
                &id,
                StateUpdate {
                    current_status: Some(RequestStatus::InProgress),
                    ..Default::default()
                },
                "1",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn two_phase_rollback_restores_previous_snapshot() {
        let store = Arc::new(InMemoryStore::new());
        let inner = Arc::new(StateManager::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(WorkflowRegistry::new()),
            &EngineConfig::default(),
        ));
        let enhanced = EnhancedStateManager::new(Arc::clone(&inner));

        let id = inner
            .create_request(WorkflowType::ConnectionRequest, create_data(1))
            .await
            .unwrap();
        let before = inner.get_request(&id).await.unwrap().unwrap();

        let txid = enhanced.begin_transaction();
        enhanced
            .add_operation(
                txid,
                "update_request_state",
                Value::Null,
                serde_json::json!({ "previous_state": serde_json::to_value(&before).unwrap() }),
            )
            .unwrap();
        assert_eq!(enhanced.active_transaction_count(), 1);

        // Mutate, then roll back.
        inner
            .update_request_state(
                &id,
                StateUpdate {
                    current_role: Some(Role::Controller),
                    current_status: Some(RequestStatus::InProgress),
                    action: "forward_to_controller".to_string(),
                    ..Default::default()
                },
                "2",
            )
            .await
            .unwrap();
        enhanced.rollback_transaction(txid).await.unwrap();

        let after = inner.get_request(&id).await.unwrap().unwrap();
        assert_eq!(after.current_role, Role::Manager);
        assert_eq!(enhanced.active_transaction_count(), 0);
    }
}
