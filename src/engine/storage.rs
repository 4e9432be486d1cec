// Storage abstraction for the workflow engine
// Defines the interface for persisting requests, audit rows and queues

//! # Storage Abstraction Layer
//!
//! The [`Store`] trait is the single persistence seam of the engine. It
//! covers every persisted entity family - service requests with their
//! transition log, users, staff-application audit rows, the notification
//! retry queue, error records and equipment stock - so that the rest of the
//! engine never sees a concrete backend.
//!
//! Two implementations exist:
//! - [`InMemoryStore`]: RwLock'd maps for tests, demos and single-process
//!   development runs.
//! - [`crate::engine::pg::PgStore`]: the production Postgres backend.
//!
//! ## Atomicity contract
//!
//! `insert_request` and `update_request` are transactional: the request row
//! and its paired transition row commit together or not at all. Per-request
//! updates serialize through the backend (row transaction in Postgres, the
//! write lock here), which is what gives transitions on one request their
//! total order. Transition ids are assigned monotonically by the store and
//! break `created_at` ties.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Local, NaiveDate, Utc};

use crate::models::{
    ErrorRecord, InventoryMovement, NotificationRetryEntry, RequestStatus, Role, ServiceRequest,
    StaffApplicationAudit, StateTransition, User,
};
use crate::{EngineError, Result};

/// Outcome of an atomic stock decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockConsumption {
    /// Stock was decremented; `remaining` units left.
    Consumed { remaining: u32 },
    /// Not enough stock; nothing was decremented.
    Short { available: u32 },
}

/// Storage interface for the workflow engine.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    // --- Requests and their transition log ---

    /// Insert a new request together with its initiation transition row, in
    /// one transaction. Returns the assigned transition id.
    async fn insert_request(
        &self,
        request: &ServiceRequest,
        initiation: &StateTransition,
    ) -> Result<i64>;

    async fn get_request(&self, id: &str) -> Result<Option<ServiceRequest>>;

    /// Replace the stored request and, when the change moved the role or
    /// status, append the paired transition row - atomically. Fails with
    /// `RequestNotFound` if the request does not exist; failures leave the
    /// stored row untouched.
    async fn update_request(
        &self,
        request: &ServiceRequest,
        transition: Option<&StateTransition>,
    ) -> Result<()>;

    /// Requests currently held by a role, priority-desc then oldest-first.
    async fn list_requests_by_role(
        &self,
        role: Role,
        status: Option<RequestStatus>,
    ) -> Result<Vec<ServiceRequest>>;

    async fn list_requests_by_client(&self, client_id: i64) -> Result<Vec<ServiceRequest>>;

    async fn list_requests_by_status(&self, status: RequestStatus) -> Result<Vec<ServiceRequest>>;

    /// Admin cleanup: remove a request and its transition log. Returns
    /// whether anything was deleted.
    async fn delete_request(&self, id: &str) -> Result<bool>;

    /// Append a free-standing transition row (recovery annotations).
    /// Returns the assigned id.
    async fn append_transition(&self, transition: &StateTransition) -> Result<i64>;

    /// Full transition log of a request, ordered by `(created_at, id)`.
    async fn list_transitions(&self, request_id: &str) -> Result<Vec<StateTransition>>;

    /// Remove one transition row by id. Only the recovery subsystem calls
    /// this, to pop the latest row when resetting a request.
    async fn delete_transition(&self, transition_id: i64) -> Result<bool>;

    // --- Users ---

    /// Insert a user; the store assigns and returns the id.
    async fn insert_user(&self, user: &User) -> Result<i64>;

    async fn get_user(&self, id: i64) -> Result<Option<User>>;

    /// Exact match on any of the given phone spellings.
    async fn find_user_by_phone(&self, variants: &[String]) -> Result<Option<User>>;

    /// Case-insensitive substring match over client names.
    async fn search_clients_by_name(&self, fragment: &str) -> Result<Vec<User>>;

    // --- Staff application audit ---

    async fn insert_staff_audit(&self, audit: &StaffApplicationAudit) -> Result<()>;

    /// Audit rows created by a staff member on a store-local calendar day.
    async fn count_staff_audits_on_day(&self, creator_id: i64, day: NaiveDate) -> Result<u32>;

    async fn mark_audit_client_notified(&self, application_id: &str) -> Result<()>;

    // --- Notification retry queue ---

    async fn push_retry(&self, entry: &NotificationRetryEntry) -> Result<()>;

    /// Entries due at `now` that have not exhausted their attempts.
    async fn due_retries(
        &self,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<NotificationRetryEntry>>;

    /// Rewrite an entry, keyed by `(request_id, intended_recipient_role)`.
    async fn update_retry(&self, entry: &NotificationRetryEntry) -> Result<()>;

    async fn delete_retry(&self, request_id: &str, role: Role) -> Result<()>;

    async fn list_retries(&self) -> Result<Vec<NotificationRetryEntry>>;

    // --- Error records ---

    async fn insert_error_record(&self, record: &ErrorRecord) -> Result<()>;

    async fn recent_error_records(&self, since: DateTime<Utc>) -> Result<Vec<ErrorRecord>>;

    // --- Equipment stock ---

    async fn set_stock_level(&self, name: &str, quantity: u32) -> Result<()>;

    async fn stock_level(&self, name: &str) -> Result<Option<u32>>;

    /// Atomically decrement stock and record the movement. A shortage
    /// decrements nothing and records nothing.
    async fn consume_stock(&self, request_id: &str, name: &str, quantity: u32)
        -> Result<StockConsumption>;

    async fn list_inventory_movements(&self, request_id: &str) -> Result<Vec<InventoryMovement>>;
}

/// In-memory store for development and testing.
///
/// Thread-safe through per-table `RwLock`s, mirroring the production
/// backend's semantics closely enough for the engine's tests: atomic
/// request+transition writes under the write lock, monotonic transition
/// ids, and the same ordering rules on reads.
///
/// Not persistent and not shared across processes.
#[derive(Default)]
pub struct InMemoryStore {
    requests: RwLock<HashMap<String, ServiceRequest>>,
    transitions: RwLock<Vec<StateTransition>>,
    next_transition_id: AtomicI64,
    users: RwLock<HashMap<i64, User>>,
    next_user_id: AtomicI64,
    audits: RwLock<Vec<StaffApplicationAudit>>,
    retries: RwLock<Vec<NotificationRetryEntry>>,
    errors: RwLock<Vec<ErrorRecord>>,
    stock: RwLock<HashMap<String, u32>>,
    movements: RwLock<Vec<InventoryMovement>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore {
            next_transition_id: AtomicI64::new(1),
            next_user_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    fn assign_transition_id(&self) -> i64 {
        self.next_transition_id.fetch_add(1, Ordering::SeqCst)
    }

    fn sort_for_role_queue(requests: &mut [ServiceRequest]) {
        requests.sort_by(|a, b| {
            b.priority
                .rank()
                .cmp(&a.priority.rank())
                .then(a.created_at.cmp(&b.created_at))
        });
    }
}

#[async_trait::async_trait]
impl Store for InMemoryStore {
    async fn insert_request(
        &self,
        request: &ServiceRequest,
        initiation: &StateTransition,
    ) -> Result<i64> {
        let mut requests = self.requests.write().unwrap();
        if requests.contains_key(&request.id) {
            return Err(EngineError::Invariant(format!(
                "duplicate request id {}",
                request.id
            )));
        }
        let mut row = initiation.clone();
        row.id = self.assign_transition_id();
        requests.insert(request.id.clone(), request.clone());
        self.transitions.write().unwrap().push(row.clone());
        Ok(row.id)
    }

    async fn get_request(&self, id: &str) -> Result<Option<ServiceRequest>> {
        Ok(self.requests.read().unwrap().get(id).cloned())
    }

    async fn update_request(
        &self,
        request: &ServiceRequest,
        transition: Option<&StateTransition>,
    ) -> Result<()> {
        let mut requests = self.requests.write().unwrap();
        if !requests.contains_key(&request.id) {
            return Err(EngineError::RequestNotFound(request.id.clone()));
        }
        requests.insert(request.id.clone(), request.clone());
        if let Some(transition) = transition {
            let mut row = transition.clone();
            row.id = self.assign_transition_id();
            self.transitions.write().unwrap().push(row);
        }
        Ok(())
    }

    async fn list_requests_by_role(
        &self,
        role: Role,
        status: Option<RequestStatus>,
    ) -> Result<Vec<ServiceRequest>> {
        let mut matches: Vec<_> = self
            .requests
            .read()
            .unwrap()
            .values()
            .filter(|r| r.current_role == role)
            .filter(|r| status.map_or(true, |s| r.current_status == s))
            .cloned()
            .collect();
        Self::sort_for_role_queue(&mut matches);
        Ok(matches)
    }

    async fn list_requests_by_client(&self, client_id: i64) -> Result<Vec<ServiceRequest>> {
        let mut matches: Vec<_> = self
            .requests
            .read()
            .unwrap()
            .values()
            .filter(|r| r.client_id == client_id)
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matches)
    }

    async fn list_requests_by_status(&self, status: RequestStatus) -> Result<Vec<ServiceRequest>> {
        let mut matches: Vec<_> = self
            .requests
            .read()
            .unwrap()
            .values()
            .filter(|r| r.current_status == status)
            .cloned()
            .collect();
        Self::sort_for_role_queue(&mut matches);
        Ok(matches)
    }

    async fn delete_request(&self, id: &str) -> Result<bool> {
        let removed = self.requests.write().unwrap().remove(id).is_some();
        if removed {
            self.transitions
                .write()
                .unwrap()
                .retain(|t| t.request_id != id);
        }
        Ok(removed)
    }

    async fn append_transition(&self, transition: &StateTransition) -> Result<i64> {
        let mut row = transition.clone();
        row.id = self.assign_transition_id();
        let id = row.id;
        self.transitions.write().unwrap().push(row);
        Ok(id)
    }

    async fn list_transitions(&self, request_id: &str) -> Result<Vec<StateTransition>> {
        let mut rows: Vec<_> = self
            .transitions
            .read()
            .unwrap()
            .iter()
            .filter(|t| t.request_id == request_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn delete_transition(&self, transition_id: i64) -> Result<bool> {
        let mut transitions = self.transitions.write().unwrap();
        let before = transitions.len();
        transitions.retain(|t| t.id != transition_id);
        Ok(transitions.len() < before)
    }

    async fn insert_user(&self, user: &User) -> Result<i64> {
        let mut users = self.users.write().unwrap();
        let id = if user.id > 0 {
            user.id
        } else {
            self.next_user_id.fetch_add(1, Ordering::SeqCst)
        };
        let mut stored = user.clone();
        stored.id = id;
        users.insert(id, stored);
        // Keep the counter ahead of explicitly assigned ids.
        let next = self.next_user_id.load(Ordering::SeqCst);
        if id >= next {
            self.next_user_id.store(id + 1, Ordering::SeqCst);
        }
        Ok(id)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        Ok(self.users.read().unwrap().get(&id).cloned())
    }

    async fn find_user_by_phone(&self, variants: &[String]) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .unwrap()
            .values()
            .find(|u| variants.iter().any(|v| u.phone_normalised == *v))
            .cloned())
    }

    async fn search_clients_by_name(&self, fragment: &str) -> Result<Vec<User>> {
        let needle = fragment.to_lowercase();
        Ok(self
            .users
            .read()
            .unwrap()
            .values()
            .filter(|u| u.role == Role::Client)
            .filter(|u| u.full_name.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    async fn insert_staff_audit(&self, audit: &StaffApplicationAudit) -> Result<()> {
        self.audits.write().unwrap().push(audit.clone());
        Ok(())
    }

    async fn count_staff_audits_on_day(&self, creator_id: i64, day: NaiveDate) -> Result<u32> {
        Ok(self
            .audits
            .read()
            .unwrap()
            .iter()
            .filter(|a| a.creator_id == creator_id)
            .filter(|a| a.creation_timestamp.with_timezone(&Local).date_naive() == day)
            .count() as u32)
    }

    async fn mark_audit_client_notified(&self, application_id: &str) -> Result<()> {
        let mut audits = self.audits.write().unwrap();
        for audit in audits.iter_mut() {
            if audit.application_id == application_id {
                audit.client_notified = true;
            }
        }
        Ok(())
    }

    async fn push_retry(&self, entry: &NotificationRetryEntry) -> Result<()> {
        let mut retries = self.retries.write().unwrap();
        // One live entry per (request, recipient role).
        retries.retain(|e| {
            !(e.request_id == entry.request_id
                && e.intended_recipient_role == entry.intended_recipient_role)
        });
        retries.push(entry.clone());
        Ok(())
    }

    async fn due_retries(
        &self,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<NotificationRetryEntry>> {
        Ok(self
            .retries
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.is_due(now) && !e.is_exhausted(max_attempts))
            .cloned()
            .collect())
    }

    async fn update_retry(&self, entry: &NotificationRetryEntry) -> Result<()> {
        let mut retries = self.retries.write().unwrap();
        for stored in retries.iter_mut() {
            if stored.request_id == entry.request_id
                && stored.intended_recipient_role == entry.intended_recipient_role
            {
                *stored = entry.clone();
            }
        }
        Ok(())
    }

    async fn delete_retry(&self, request_id: &str, role: Role) -> Result<()> {
        self.retries
            .write()
            .unwrap()
            .retain(|e| !(e.request_id == request_id && e.intended_recipient_role == role));
        Ok(())
    }

    async fn list_retries(&self) -> Result<Vec<NotificationRetryEntry>> {
        Ok(self.retries.read().unwrap().clone())
    }

    async fn insert_error_record(&self, record: &ErrorRecord) -> Result<()> {
        self.errors.write().unwrap().push(record.clone());
        Ok(())
    }

    async fn recent_error_records(&self, since: DateTime<Utc>) -> Result<Vec<ErrorRecord>> {
        Ok(self
            .errors
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.created_at >= since)
            .cloned()
            .collect())
    }

    async fn set_stock_level(&self, name: &str, quantity: u32) -> Result<()> {
        self.stock
            .write()
            .unwrap()
            .insert(name.to_string(), quantity);
        Ok(())
    }

    async fn stock_level(&self, name: &str) -> Result<Option<u32>> {
        Ok(self.stock.read().unwrap().get(name).copied())
    }

    async fn consume_stock(
        &self,
        request_id: &str,
        name: &str,
        quantity: u32,
    ) -> Result<StockConsumption> {
        let mut stock = self.stock.write().unwrap();
        let available = stock.get(name).copied().unwrap_or(0);
        if available < quantity {
            return Ok(StockConsumption::Short { available });
        }
        let remaining = available - quantity;
        stock.insert(name.to_string(), remaining);
        self.movements
            .write()
            .unwrap()
            .push(InventoryMovement::new(request_id, name, quantity));
        Ok(StockConsumption::Consumed { remaining })
    }

    async fn list_inventory_movements(&self, request_id: &str) -> Result<Vec<InventoryMovement>> {
        Ok(self
            .movements
            .read()
            .unwrap()
            .iter()
            .filter(|m| m.request_id == request_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContactInfo, Priority, WorkflowType};
    use serde_json::Map;

    fn request(id: &str, role: Role, priority: Priority) -> ServiceRequest {
        let mut r = ServiceRequest::new(
            WorkflowType::ConnectionRequest,
            1,
            role,
            "install".to_string(),
            "Tashkent".to_string(),
            ContactInfo::default(),
            priority,
        );
        r.id = id.to_string();
        r
    }

    fn initiation(request_id: &str) -> StateTransition {
        StateTransition::new(
            request_id,
            None,
            Some(Role::Manager),
            "submit_request",
            Some(1),
            Map::new(),
            "Workflow initiated by client",
        )
    }

    #[test]
    fn insert_pairs_request_with_initiation_row() {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            let r = request("req-1", Role::Manager, Priority::Medium);
            store.insert_request(&r, &initiation("req-1")).await.unwrap();

            let stored = store.get_request("req-1").await.unwrap().unwrap();
            assert_eq!(stored.current_role, Role::Manager);

            let log = store.list_transitions("req-1").await.unwrap();
            assert_eq!(log.len(), 1);
            assert!(log[0].is_initiation());
            assert_eq!(log[0].id, 1);
        });
    }

    #[test]
    fn transition_ids_are_monotonic_per_request() {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            let r = request("req-1", Role::Manager, Priority::Medium);
            store.insert_request(&r, &initiation("req-1")).await.unwrap();

            for _ in 0..3 {
                store
                    .append_transition(&StateTransition::new(
                        "req-1",
                        Some(Role::Manager),
                        Some(Role::JuniorManager),
                        "assign_to_junior_manager",
                        Some(2),
                        Map::new(),
                        "Action: assign_to_junior_manager",
                    ))
                    .await
                    .unwrap();
            }

            let log = store.list_transitions("req-1").await.unwrap();
            let ids: Vec<i64> = log.iter().map(|t| t.id).collect();
            let mut sorted = ids.clone();
            sorted.sort_unstable();
            assert_eq!(ids, sorted);
        });
    }

    #[test]
    fn role_queue_orders_priority_desc_then_oldest_first() {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            let mut low = request("req-low", Role::Manager, Priority::Low);
            low.created_at = Utc::now() - chrono::Duration::hours(3);
            let mut urgent_old = request("req-urgent-old", Role::Manager, Priority::Urgent);
            urgent_old.created_at = Utc::now() - chrono::Duration::hours(2);
            let urgent_new = request("req-urgent-new", Role::Manager, Priority::Urgent);

            for r in [&low, &urgent_old, &urgent_new] {
                store.insert_request(r, &initiation(&r.id)).await.unwrap();
            }

            let queue = store
                .list_requests_by_role(Role::Manager, None)
                .await
                .unwrap();
            let ids: Vec<&str> = queue.iter().map(|r| r.id.as_str()).collect();
            assert_eq!(ids, vec!["req-urgent-old", "req-urgent-new", "req-low"]);
        });
    }

    #[test]
    fn update_unknown_request_fails_without_side_effects() {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            let ghost = request("ghost", Role::Manager, Priority::Medium);
            let err = store.update_request(&ghost, None).await.unwrap_err();
            assert!(matches!(err, EngineError::RequestNotFound(_)));
            assert!(store.list_transitions("ghost").await.unwrap().is_empty());
        });
    }

    #[test]
    fn stock_consumption_is_all_or_nothing() {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            store.set_stock_level("Router", 2).await.unwrap();

            let first = store.consume_stock("req-1", "Router", 1).await.unwrap();
            assert_eq!(first, StockConsumption::Consumed { remaining: 1 });

            let short = store.consume_stock("req-1", "Router", 5).await.unwrap();
            assert_eq!(short, StockConsumption::Short { available: 1 });

            // The shortage consumed nothing and recorded no movement.
            assert_eq!(store.stock_level("Router").await.unwrap(), Some(1));
            assert_eq!(
                store.list_inventory_movements("req-1").await.unwrap().len(),
                1
            );
        });
    }

    #[test]
    fn daily_audit_count_respects_local_day_boundary() {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            let today = Local::now().date_naive();

            let mut fresh = StaffApplicationAudit::new(
                "app-1",
                7,
                Role::JuniorManager,
                1,
                WorkflowType::ConnectionRequest,
                Map::new(),
            );
            fresh.creation_timestamp = Utc::now();
            let mut stale = fresh.clone();
            stale.application_id = "app-0".to_string();
            stale.creation_timestamp = Utc::now() - chrono::Duration::days(2);

            store.insert_staff_audit(&fresh).await.unwrap();
            store.insert_staff_audit(&stale).await.unwrap();

            assert_eq!(store.count_staff_audits_on_day(7, today).await.unwrap(), 1);
        });
    }

    #[test]
    fn retry_queue_keeps_one_entry_per_recipient() {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            let entry = NotificationRetryEntry::new("req-1", Role::Manager, "timeout", 30);
            store.push_retry(&entry).await.unwrap();
            store.push_retry(&entry).await.unwrap();
            assert_eq!(store.list_retries().await.unwrap().len(), 1);

            store.delete_retry("req-1", Role::Manager).await.unwrap();
            assert!(store.list_retries().await.unwrap().is_empty());
        });
    }
}
