// Notification dispatch over a persistent retry queue

//! # Notification System
//!
//! Stateless dispatcher between the engine and the external messaging
//! gateway. The gateway is behind the [`NotificationTransport`] trait; the
//! engine renders [`NotificationIntent`]s and hands them over.
//!
//! Delivery is at-least-once: a failed delivery pushes a retry-queue entry
//! (`retry_count = 0`, first retry after the base delay) and the drain loop
//! re-dispatches due entries with exponential backoff - base 30 s, doubling
//! per attempt, capped at 30 min, at most 10 attempts, plus a little jitter
//! so a burst of failures does not re-fire in lockstep. Exhausted entries
//! stay queued for manual review. Delivery failures never propagate into
//! the workflow operation that produced the intent.

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::NotificationConfig;
use crate::models::{
    ErrorCategory, ErrorRecord, ErrorSeverity, NotificationIntent, NotificationRetryEntry,
    RequestStatus, Role, ServiceRequest,
};
use crate::Result;

use super::storage::Store;

/// Seam to the external messaging gateway.
#[async_trait::async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn deliver(&self, intent: &NotificationIntent) -> anyhow::Result<()>;
}

/// Renders and dispatches notification intents; owns the retry queue.
pub struct NotificationSystem {
    store: Arc<dyn Store>,
    transport: Arc<dyn NotificationTransport>,
    config: NotificationConfig,
}

impl NotificationSystem {
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn NotificationTransport>,
        config: NotificationConfig,
    ) -> Self {
        NotificationSystem {
            store,
            transport,
            config,
        }
    }

    /// Deliver one intent. Returns whether delivery succeeded; a failure is
    /// queued for retry and never bubbles up.
    pub async fn dispatch(&self, intent: &NotificationIntent) -> bool {
        match self.transport.deliver(intent).await {
            Ok(()) => {
                // A success clears any earlier failure for the same target.
                let _ = self
                    .store
                    .delete_retry(intent.request_id(), intent.recipient_role())
                    .await;
                debug!(request_id = intent.request_id(), "notification delivered");
                true
            }
            Err(err) => {
                warn!(
                    request_id = intent.request_id(),
                    recipient = %intent.recipient_role(),
                    error = %err,
                    "notification delivery failed, queueing retry"
                );
                let entry = NotificationRetryEntry::new(
                    intent.request_id(),
                    intent.recipient_role(),
                    err.to_string(),
                    self.config.retry_base_secs,
                );
                if let Err(push_err) = self.store.push_retry(&entry).await {
                    error!(error = %push_err, "failed to enqueue notification retry");
                }
                let record = ErrorRecord::new(
                    ErrorCategory::Notification,
                    ErrorSeverity::Low,
                    format!("delivery failed: {err}"),
                )
                .with_context("request_id", intent.request_id().into())
                .with_context("recipient_role", intent.recipient_role().as_str().into());
                if let Err(log_err) = self.store.insert_error_record(&record).await {
                    warn!(error = %log_err, "failed to record notification failure");
                }
                false
            }
        }
    }

    /// Re-render the intent for a queued retry from the current request
    /// snapshot. Returns `None` when there is nothing sensible left to send
    /// (request deleted, or a client notice for a request that no longer
    /// needs one); such entries are dropped.
    async fn rebuild_intent(
        &self,
        entry: &NotificationRetryEntry,
    ) -> Result<Option<NotificationIntent>> {
        let Some(request) = self.store.get_request(&entry.request_id).await? else {
            return Ok(None);
        };

        let intent = match entry.intended_recipient_role {
            Role::Client => match client_intent(&request) {
                Some(intent) => intent,
                None => return Ok(None),
            },
            role => NotificationIntent::Assignment {
                role,
                request_id: request.id.clone(),
                description: brief(&request.description),
                priority: request.priority,
            },
        };
        Ok(Some(intent))
    }

    /// One drain pass: re-dispatch every due entry. Returns the number of
    /// successful re-deliveries.
    pub async fn drain_due(&self) -> Result<usize> {
        let now = Utc::now();
        let due = self.store.due_retries(now, self.config.max_attempts).await?;
        let mut delivered = 0;

        for mut entry in due {
            let Some(intent) = self.rebuild_intent(&entry).await? else {
                self.store
                    .delete_retry(&entry.request_id, entry.intended_recipient_role)
                    .await?;
                continue;
            };

            match self.transport.deliver(&intent).await {
                Ok(()) => {
                    self.store
                        .delete_retry(&entry.request_id, entry.intended_recipient_role)
                        .await?;
                    if matches!(intent, NotificationIntent::ClientOnStaffCreation { .. }) {
                        self.store
                            .mark_audit_client_notified(&entry.request_id)
                            .await?;
                    }
                    delivered += 1;
                }
                Err(err) => {
                    entry.retry_count += 1;
                    entry.last_error = err.to_string();
                    let delay = NotificationRetryEntry::backoff_delay(
                        entry.retry_count,
                        self.config.retry_base_secs,
                        self.config.retry_factor,
                        self.config.retry_cap_secs,
                    );
                    let jitter =
                        chrono::Duration::seconds(rand::thread_rng().gen_range(0..=5));
                    entry.next_retry_at = now + delay + jitter;
                    if entry.is_exhausted(self.config.max_attempts) {
                        error!(
                            request_id = %entry.request_id,
                            recipient = %entry.intended_recipient_role,
                            attempts = entry.retry_count,
                            "notification retries exhausted, flagged for manual review"
                        );
                    }
                    self.store.update_retry(&entry).await?;
                }
            }
        }
        Ok(delivered)
    }

    /// Background drain loop. Runs until the shutdown signal flips; an
    /// in-flight pass finishes before the loop exits.
    pub fn spawn_drain_loop(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let interval = std::time::Duration::from_secs(self.config.drain_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            info!(interval_secs = interval.as_secs(), "notification drain loop started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.drain_due().await {
                            Ok(0) => {}
                            Ok(count) => info!(count, "re-delivered queued notifications"),
                            Err(err) => warn!(error = %err, "notification drain pass failed"),
                        }
                    }
                    _ = shutdown.changed() => {
                        info!("notification drain loop stopping");
                        break;
                    }
                }
            }
        })
    }
}

/// The client-addressed intent a request currently calls for.
fn client_intent(request: &ServiceRequest) -> Option<NotificationIntent> {
    if request.current_status == RequestStatus::Completed {
        return Some(NotificationIntent::Completion {
            client_id: request.client_id,
            request_id: request.id.clone(),
            rating: request.completion_rating,
        });
    }
    let creator = request.state_data.staff_creator()?;
    Some(NotificationIntent::ClientOnStaffCreation {
        client_id: request.client_id,
        request_id: request.id.clone(),
        workflow_type: request.workflow_type,
        creator_role: creator.creator_role,
    })
}

fn brief(description: &str) -> String {
    const LIMIT: usize = 80;
    if description.chars().count() <= LIMIT {
        description.to_string()
    } else {
        let truncated: String = description.chars().take(LIMIT).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::storage::InMemoryStore;
    use crate::models::{ContactInfo, Priority, WorkflowType};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Transport double that fails the first `failures` deliveries.
    struct FlakyTransport {
        failures: u32,
        attempts: AtomicU32,
    }

    impl FlakyTransport {
        fn failing(failures: u32) -> Self {
            FlakyTransport {
                failures,
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl NotificationTransport for FlakyTransport {
        async fn deliver(&self, _intent: &NotificationIntent) -> anyhow::Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                anyhow::bail!("gateway unavailable")
            }
            Ok(())
        }
    }

    fn seeded_store() -> Arc<InMemoryStore> {
        Arc::new(InMemoryStore::new())
    }

    async fn seed_request(store: &Arc<InMemoryStore>, id: &str) {
        let mut request = ServiceRequest::new(
            WorkflowType::ConnectionRequest,
            1,
            Role::Manager,
            "install".to_string(),
            "Tashkent".to_string(),
            ContactInfo::default(),
            Priority::Medium,
        );
        request.id = id.to_string();
        let initiation = crate::models::StateTransition::new(
            id,
            None,
            Some(Role::Manager),
            "submit_request",
            Some(1),
            serde_json::Map::new(),
            "Workflow initiated by client",
        );
        store.insert_request(&request, &initiation).await.unwrap();
    }

    fn assignment(id: &str) -> NotificationIntent {
        NotificationIntent::Assignment {
            role: Role::Manager,
            request_id: id.to_string(),
            description: "install".to_string(),
            priority: Priority::Medium,
        }
    }

    #[tokio::test]
    async fn failed_delivery_enqueues_a_retry_entry() {
        let store = seeded_store();
        seed_request(&store, "req-1").await;
        let system = NotificationSystem::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(FlakyTransport::failing(u32::MAX)),
            NotificationConfig::default(),
        );

        assert!(!system.dispatch(&assignment("req-1")).await);

        let retries = store.list_retries().await.unwrap();
        assert_eq!(retries.len(), 1);
        assert_eq!(retries[0].retry_count, 0);
        assert_eq!(retries[0].intended_recipient_role, Role::Manager);
    }

    #[tokio::test]
    async fn drain_redelivers_and_clears_the_entry() {
        let store = seeded_store();
        seed_request(&store, "req-1").await;
        // First delivery fails, the drain's redelivery succeeds.
        let system = NotificationSystem::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(FlakyTransport::failing(1)),
            NotificationConfig::default(),
        );

        assert!(!system.dispatch(&assignment("req-1")).await);

        // Force the entry due.
        let mut entry = store.list_retries().await.unwrap().remove(0);
        entry.next_retry_at = Utc::now() - chrono::Duration::seconds(1);
        store.update_retry(&entry).await.unwrap();

        let delivered = system.drain_due().await.unwrap();
        assert_eq!(delivered, 1);
        assert!(store.list_retries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_failures_back_off_and_exhaust() {
        let store = seeded_store();
        seed_request(&store, "req-1").await;
        let mut config = NotificationConfig::default();
        config.max_attempts = 2;
        let system = NotificationSystem::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(FlakyTransport::failing(u32::MAX)),
            config,
        );

        assert!(!system.dispatch(&assignment("req-1")).await);

        for _ in 0..2 {
            let mut entry = store.list_retries().await.unwrap().remove(0);
            entry.next_retry_at = Utc::now() - chrono::Duration::seconds(1);
            store.update_retry(&entry).await.unwrap();
            system.drain_due().await.unwrap();
        }

        // Exhausted entries stay queued for manual review and are no longer
        // considered due.
        let remaining = store.list_retries().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].retry_count, 2);
        assert!(store
            .due_retries(Utc::now() + chrono::Duration::hours(2), 2)
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn brief_truncates_long_descriptions() {
        let long = "x".repeat(200);
        assert_eq!(brief(&long).chars().count(), 83);
        assert_eq!(brief("short"), "short");
    }
}
