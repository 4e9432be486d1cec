// Equipment inventory - consumption and reconciliation

//! # Inventory Manager
//!
//! Consumes equipment stock after the warehouse `update_inventory` step and
//! reconciles requests whose consumption was missed. A stock shortage never
//! fails the workflow: the transition stands, an `inventory` error record is
//! written, the warehouse is escalated to, and the request is flagged with
//! `equipment_shortage` in its state data.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::models::{
    ErrorCategory, ErrorRecord, ErrorSeverity, NotificationIntent, RequestStatus, ServiceRequest,
};
use crate::Result;

use super::notify::NotificationSystem;
use super::state_manager::{StateManager, StateUpdate};
use super::storage::StockConsumption;

/// Outcome summary of an admin-invoked reconciliation run.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationReport {
    /// Completed requests examined (inventory not yet updated, equipment
    /// documented).
    pub examined: usize,
    /// Requests whose consumption completed and whose flag was flipped.
    pub reconciled: usize,
    /// `(request_id, item_name)` pairs that could not be consumed.
    pub discrepancies: Vec<(String, String)>,
}

pub struct InventoryManager {
    state_manager: Arc<StateManager>,
    notifications: Arc<NotificationSystem>,
}

impl InventoryManager {
    pub fn new(state_manager: Arc<StateManager>, notifications: Arc<NotificationSystem>) -> Self {
        InventoryManager {
            state_manager,
            notifications,
        }
    }

    /// Consume the documented equipment of a request and flip its
    /// `inventory_updated` flag. Invoked by the engine after the warehouse
    /// `update_inventory` transition committed; also the worker of the
    /// reconciliation sweep. Returns whether a shortage was hit.
    pub async fn consume_for_request(&self, request_id: &str) -> Result<bool> {
        let Some(request) = self.state_manager.get_request(request_id).await? else {
            return Ok(false);
        };
        if request.inventory_updated {
            // Flips at most once; a second update_inventory is a no-op here.
            return Ok(false);
        }

        let mut shortage = false;
        for item in &request.equipment_used {
            match self
                .state_manager
                .store()
                .consume_stock(request_id, &item.name, item.quantity)
                .await?
            {
                StockConsumption::Consumed { remaining } => {
                    info!(
                        request_id,
                        item = %item.name,
                        quantity = item.quantity,
                        remaining,
                        "consumed equipment stock"
                    );
                }
                StockConsumption::Short { available } => {
                    shortage = true;
                    self.record_shortage(&request, &item.name, item.quantity, available)
                        .await;
                }
            }
        }

        let mut update = StateUpdate {
            inventory_updated: Some(true),
            ..Default::default()
        };
        if shortage {
            let mut data = serde_json::Map::new();
            data.insert("equipment_shortage".to_string(), Value::Bool(true));
            update.state_data = Some(data);
        }
        self.state_manager
            .update_request_state(request_id, update, "inventory")
            .await?;

        Ok(shortage)
    }

    async fn record_shortage(
        &self,
        request: &ServiceRequest,
        item: &str,
        requested: u32,
        available: u32,
    ) {
        warn!(
            request_id = %request.id,
            item,
            requested,
            available,
            "equipment stock shortage"
        );
        let record = ErrorRecord::new(
            ErrorCategory::Inventory,
            ErrorSeverity::Medium,
            format!("stock shortage for '{item}': requested {requested}, available {available}"),
        )
        .with_context("request_id", Value::from(request.id.as_str()))
        .with_context("item", Value::from(item));
        if let Err(err) = self
            .state_manager
            .store()
            .insert_error_record(&record)
            .await
        {
            warn!(error = %err, "failed to record inventory shortage");
        }

        self.notifications
            .dispatch(&NotificationIntent::WarehouseEscalation {
                request_id: request.id.clone(),
                item: item.to_string(),
                requested,
                available,
            })
            .await;
    }

    /// Admin-invoked sweep: attempt consumption for every completed request
    /// that documented equipment but never had its inventory updated.
    pub async fn reconcile(&self) -> Result<ReconciliationReport> {
        let completed = self
            .state_manager
            .get_requests_by_status(RequestStatus::Completed)
            .await?;

        let mut report = ReconciliationReport::default();
        for request in completed {
            if request.inventory_updated || request.equipment_used.is_empty() {
                continue;
            }
            report.examined += 1;
            match self.consume_for_request(&request.id).await {
                Ok(false) => report.reconciled += 1,
                Ok(true) => {
                    for item in &request.equipment_used {
                        report
                            .discrepancies
                            .push((request.id.clone(), item.name.clone()));
                    }
                }
                Err(err) => {
                    warn!(request_id = %request.id, error = %err, "reconciliation failed");
                    report
                        .discrepancies
                        .push((request.id.clone(), "<error>".to_string()));
                }
            }
        }
        info!(
            examined = report.examined,
            reconciled = report.reconciled,
            discrepancies = report.discrepancies.len(),
            "inventory reconciliation finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::notify::NotificationTransport;
    use crate::engine::storage::{InMemoryStore, Store};
    use crate::engine::state_manager::CreateRequest;
    use crate::models::{ContactInfo, EquipmentItem, Priority, WorkflowRegistry, WorkflowType};

    struct NullTransport;

    #[async_trait::async_trait]
    impl NotificationTransport for NullTransport {
        async fn deliver(&self, _intent: &NotificationIntent) -> anyhow::Result<()> {
            Ok(())
        }
    }

    async fn setup() -> (Arc<InMemoryStore>, Arc<StateManager>, InventoryManager) {
        let store = Arc::new(InMemoryStore::new());
        let config = EngineConfig::default();
        let state_manager = Arc::new(StateManager::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(WorkflowRegistry::new()),
            &config,
        ));
        let notifications = Arc::new(NotificationSystem::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(NullTransport),
            config.notification.clone(),
        ));
        let inventory = InventoryManager::new(Arc::clone(&state_manager), notifications);
        (store, state_manager, inventory)
    }

    async fn request_with_equipment(
        state_manager: &Arc<StateManager>,
        items: Vec<EquipmentItem>,
    ) -> String {
        let id = state_manager
            .create_request(
                WorkflowType::ConnectionRequest,
                CreateRequest {
                    client_id: 1,
                    description: "install".to_string(),
                    location: "Tashkent".to_string(),
                    contact_info: ContactInfo::default(),
                    priority: Priority::Medium,
                    staff_creator: None,
                    initial_state_data: serde_json::Map::new(),
                    actor_id: None,
                    initiation_comment: "Workflow initiated by client".to_string(),
                },
            )
            .await
            .unwrap();
        state_manager
            .update_request_state(
                &id,
                StateUpdate {
                    equipment_used: Some(items),
                    ..Default::default()
                },
                "test",
            )
            .await
            .unwrap();
        id
    }

    fn router(quantity: u32) -> EquipmentItem {
        EquipmentItem {
            name: "Router".to_string(),
            quantity,
            serial: None,
            kind: None,
        }
    }

    #[tokio::test]
    async fn consumption_decrements_stock_and_flips_flag_once() {
        let (store, state_manager, inventory) = setup().await;
        store.set_stock_level("Router", 5).await.unwrap();
        let id = request_with_equipment(&state_manager, vec![router(2)]).await;

        assert!(!inventory.consume_for_request(&id).await.unwrap());
        assert_eq!(store.stock_level("Router").await.unwrap(), Some(3));

        let request = state_manager.get_request(&id).await.unwrap().unwrap();
        assert!(request.inventory_updated);
        assert!(!request.state_data.equipment_shortage());

        // Second invocation consumes nothing further.
        assert!(!inventory.consume_for_request(&id).await.unwrap());
        assert_eq!(store.stock_level("Router").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn shortage_is_nonfatal_but_flagged_and_logged() {
        let (store, state_manager, inventory) = setup().await;
        store.set_stock_level("Router", 1).await.unwrap();
        let id = request_with_equipment(&state_manager, vec![router(3)]).await;

        assert!(inventory.consume_for_request(&id).await.unwrap());

        let request = state_manager.get_request(&id).await.unwrap().unwrap();
        assert!(request.state_data.equipment_shortage());

        let errors = store
            .recent_error_records(chrono::Utc::now() - chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert!(errors
            .iter()
            .any(|r| r.category == ErrorCategory::Inventory));
    }

    #[tokio::test]
    async fn reconcile_picks_up_completed_requests() {
        let (store, state_manager, inventory) = setup().await;
        store.set_stock_level("Router", 5).await.unwrap();
        let id = request_with_equipment(&state_manager, vec![router(1)]).await;

        state_manager
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

        let report = inventory.reconcile().await.unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.reconciled, 1);
        assert!(report.discrepancies.is_empty());
        assert_eq!(store.stock_level("Router").await.unwrap(), Some(4));
    }
}
