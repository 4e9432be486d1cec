// Staff-on-behalf-of-client application creation

//! # Staff Creation Handler
//!
//! Wraps the workflow engine for the staff-on-behalf-of-client use case:
//! a call-center operator, manager or other staff role opens an
//! application for a client who phoned in. The handler enforces creation
//! permissions and the per-role daily cap, validates the client and
//! application form, resolves (or registers) the client, initiates the
//! workflow, and writes the denormalised staff-application audit row the
//! quota is counted against.

use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::models::{Priority, Role, StaffApplicationAudit, StaffCreatorInfo, WorkflowType};
use crate::models::ContactInfo;
use crate::{EngineError, Result};

use super::access::{AccessControl, RolePermissions};
use super::clients::{ClientResolver, ClientValidator, NewClientData};
use super::storage::Store;
use super::workflow::{InitiationData, WorkflowEngine};

const MIN_DESCRIPTION_CHARS: usize = 10;
const MAX_DESCRIPTION_CHARS: usize = 1000;

/// Session-scoped bundle carrying staff identity and permissions through
/// the creation flow.
#[derive(Debug, Clone)]
pub struct CreatorContext {
    pub creator_id: i64,
    pub creator_role: Role,
    pub application_type: WorkflowType,
    pub permissions: RolePermissions,
    /// Applications already created today by this creator.
    pub daily_count: u32,
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// The staff-entered application form: who the client is and what they
/// need.
#[derive(Debug, Clone)]
pub struct ApplicationForm {
    pub client: NewClientData,
    pub description: String,
    pub location: String,
    /// Required for technical service applications.
    pub issue_type: Option<String>,
    pub priority: Priority,
}

/// Successful submission summary returned to the driver.
#[derive(Debug, Clone)]
pub struct SubmissionReceipt {
    pub application_id: String,
    pub workflow_type: WorkflowType,
    pub client_id: i64,
    /// Whether the client notice about the staff-created application was
    /// delivered (a failed delivery sits in the retry queue).
    pub notification_sent: bool,
    pub created_at: DateTime<Utc>,
}

pub struct StaffApplicationHandler {
    engine: Arc<WorkflowEngine>,
    resolver: Arc<ClientResolver>,
    access_control: Arc<AccessControl>,
    store: Arc<dyn Store>,
}

impl StaffApplicationHandler {
    pub fn new(
        engine: Arc<WorkflowEngine>,
        resolver: Arc<ClientResolver>,
        access_control: Arc<AccessControl>,
        store: Arc<dyn Store>,
    ) -> Self {
        StaffApplicationHandler {
            engine,
            resolver,
            access_control,
            store,
        }
    }

    /// Open a creation session: permission check, daily-quota check,
    /// creator context. No rows are written; a denied start leaves no
    /// trace beyond the denial log.
    #[instrument(skip(self), fields(creator_role = %creator_role, application_type = %application_type))]
    pub async fn start_application_creation(
        &self,
        creator_role: Role,
        creator_id: i64,
        application_type: WorkflowType,
    ) -> Result<CreatorContext> {
        self.access_control
            .validate_creation(creator_id, creator_role, application_type)
            .await?;

        let permissions = RolePermissions::for_role(creator_role);
        let daily_count = self.daily_count(creator_id).await?;
        if let Some(limit) = permissions.max_applications_per_day {
            if daily_count >= limit {
                warn!(creator_id, daily_count, limit, "daily application limit reached");
                return Err(EngineError::DailyLimitExceeded {
                    count: daily_count,
                    limit,
                });
            }
        }

        let context = CreatorContext {
            creator_id,
            creator_role,
            application_type,
            permissions,
            daily_count,
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
        };
        info!(creator_id, session_id = %context.session_id, "application creation started");
        Ok(context)
    }

    /// Validate the client and application fields of the form. Pure
    /// validation; nothing is persisted.
    pub async fn process_application_form(
        &self,
        form: &ApplicationForm,
        context: &CreatorContext,
    ) -> Result<()> {
        ClientValidator::validate_client_data(&form.client)?;

        let description_chars = form.description.trim().chars().count();
        if !(MIN_DESCRIPTION_CHARS..=MAX_DESCRIPTION_CHARS).contains(&description_chars) {
            return Err(EngineError::ValidationFailed {
                field: "description".to_string(),
                reason: format!(
                    "description must be {MIN_DESCRIPTION_CHARS}-{MAX_DESCRIPTION_CHARS} characters"
                ),
            });
        }
        if form.location.trim().is_empty() {
            return Err(EngineError::ValidationFailed {
                field: "location".to_string(),
                reason: "location must not be empty".to_string(),
            });
        }
        if context.application_type == WorkflowType::TechnicalService
            && form
                .issue_type
                .as_deref()
                .map(str::trim)
                .unwrap_or("")
                .is_empty()
        {
            return Err(EngineError::ValidationFailed {
                field: "issue_type".to_string(),
                reason: "issue_type is required for technical service".to_string(),
            });
        }
        Ok(())
    }

    /// Final validation, client resolution, workflow initiation, audit row
    /// and the submission receipt.
    #[instrument(skip(self, form, context), fields(creator_id = context.creator_id, session_id = %context.session_id))]
    pub async fn validate_and_submit(
        &self,
        form: &ApplicationForm,
        context: &CreatorContext,
    ) -> Result<SubmissionReceipt> {
        self.process_application_form(form, context).await?;

        // Re-check the cap at submission time; the session may have been
        // open across other submissions.
        let daily_count = self.daily_count(context.creator_id).await?;
        if let Some(limit) = context.permissions.max_applications_per_day {
            if daily_count >= limit {
                return Err(EngineError::DailyLimitExceeded {
                    count: daily_count,
                    limit,
                });
            }
        }

        let client_id = self.resolver.resolve_or_create(&form.client).await?;

        let creator = StaffCreatorInfo {
            creator_id: context.creator_id,
            creator_role: context.creator_role,
            creator_name: None,
        };

        let mut payload = Map::new();
        payload.insert(
            "description".to_string(),
            Value::from(form.description.clone()),
        );
        payload.insert("location".to_string(), Value::from(form.location.clone()));
        if let Some(issue_type) = &form.issue_type {
            payload.insert("issue_type".to_string(), Value::from(issue_type.clone()));
        }

        let application_id = self
            .engine
            .initiate_workflow(
                context.application_type,
                InitiationData {
                    client_id,
                    description: form.description.clone(),
                    location: form.location.clone(),
                    contact_info: ContactInfo {
                        full_name: form.client.full_name.clone(),
                        phone: ClientValidator::normalize_phone(&form.client.phone)?,
                        address: form.client.address.clone(),
                    },
                    priority: form.priority,
                    staff_creator: Some(creator),
                    payload,
                },
            )
            .await?;

        let request = self
            .engine
            .state_manager()
            .get_request(&application_id)
            .await?
            .ok_or_else(|| {
                EngineError::Invariant(format!(
                    "request {application_id} missing right after initiation"
                ))
            })?;
        let notification_sent = request.client_notified_at.is_some();

        let mut metadata = Map::new();
        metadata.insert(
            "session_id".to_string(),
            Value::from(context.session_id.to_string()),
        );
        metadata.insert(
            "permissions".to_string(),
            serde_json::to_value(&context.permissions)?,
        );
        metadata.insert(
            "application_data".to_string(),
            serde_json::json!({
                "description": form.description,
                "location": form.location,
                "issue_type": form.issue_type,
                "priority": form.priority.as_str(),
            }),
        );

        let mut audit = StaffApplicationAudit::new(
            application_id.clone(),
            context.creator_id,
            context.creator_role,
            client_id,
            context.application_type,
            metadata,
        );
        audit.client_notified = notification_sent;
        self.store.insert_staff_audit(&audit).await?;

        info!(
            application_id = %application_id,
            client_id,
            notification_sent,
            "staff application submitted"
        );
        Ok(SubmissionReceipt {
            application_id,
            workflow_type: context.application_type,
            client_id,
            notification_sent,
            created_at: request.created_at,
        })
    }

    async fn daily_count(&self, creator_id: i64) -> Result<u32> {
        self.store
            .count_staff_audits_on_day(creator_id, Local::now().date_naive())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::inventory::InventoryManager;
    use crate::engine::notify::{NotificationSystem, NotificationTransport};
    use crate::engine::state_manager::StateManager;
    use crate::engine::storage::InMemoryStore;
    use crate::models::{NotificationIntent, WorkflowRegistry};

    struct NullTransport;

    #[async_trait::async_trait]
    impl NotificationTransport for NullTransport {
        async fn deliver(&self, _intent: &NotificationIntent) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn handler_over(store: Arc<InMemoryStore>) -> StaffApplicationHandler {
        let config = EngineConfig::default();
        let registry = Arc::new(WorkflowRegistry::new());
        let state_manager = Arc::new(StateManager::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&registry),
            &config,
        ));
        let access_control = Arc::new(AccessControl::new(Arc::clone(&store) as Arc<dyn Store>));
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
            Arc::clone(&access_control),
            notifications,
            inventory,
        ));
        let resolver = Arc::new(ClientResolver::new(Arc::clone(&store) as Arc<dyn Store>));
        StaffApplicationHandler::new(engine, resolver, access_control, store as Arc<dyn Store>)
    }

    fn form() -> ApplicationForm {
        ApplicationForm {
            client: NewClientData {
                full_name: "Ahmad Karimov".to_string(),
                phone: "901234567".to_string(),
                address: Some("Tashkent, Yunusobod".to_string()),
                language: "uz".to_string(),
            },
            description: "No internet connection since yesterday".to_string(),
            location: "Tashkent".to_string(),
            issue_type: Some("connectivity".to_string()),
            priority: Priority::Medium,
        }
    }

    #[tokio::test]
    async fn technician_cannot_start_creation() {
        let handler = handler_over(Arc::new(InMemoryStore::new()));
        let err = handler
            .start_application_creation(Role::Technician, 5, WorkflowType::ConnectionRequest)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn junior_manager_cannot_create_technical() {
        let handler = handler_over(Arc::new(InMemoryStore::new()));
        let err = handler
            .start_application_creation(Role::JuniorManager, 2, WorkflowType::TechnicalService)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn daily_cap_blocks_the_sixth_junior_manager_application() {
        let store = Arc::new(InMemoryStore::new());
        // Five audits already today for creator 2 (cap is 5).
        for n in 0..5 {
            store
                .insert_staff_audit(&StaffApplicationAudit::new(
                    format!("app-{n}"),
                    2,
                    Role::JuniorManager,
                    1,
                    WorkflowType::ConnectionRequest,
                    Map::new(),
                ))
                .await
                .unwrap();
        }
        let handler = handler_over(Arc::clone(&store));

        let err = handler
            .start_application_creation(Role::JuniorManager, 2, WorkflowType::ConnectionRequest)
            .await
            .unwrap_err();
        match err {
            EngineError::DailyLimitExceeded { count, limit } => {
                assert_eq!(count, 5);
                assert_eq!(limit, 5);
            }
            other => panic!("unexpected error: {other}"),
        }

        // No sixth audit row appeared.
        assert_eq!(
            store
                .count_staff_audits_on_day(2, Local::now().date_naive())
                .await
                .unwrap(),
            5
        );
    }

    #[tokio::test]
    async fn yesterdays_audits_do_not_count_against_today() {
        let store = Arc::new(InMemoryStore::new());
        for n in 0..5 {
            let mut audit = StaffApplicationAudit::new(
                format!("app-{n}"),
                2,
                Role::JuniorManager,
                1,
                WorkflowType::ConnectionRequest,
                Map::new(),
            );
            audit.creation_timestamp = Utc::now() - chrono::Duration::days(1);
            store.insert_staff_audit(&audit).await.unwrap();
        }
        let handler = handler_over(store);

        let context = handler
            .start_application_creation(Role::JuniorManager, 2, WorkflowType::ConnectionRequest)
            .await
            .unwrap();
        assert_eq!(context.daily_count, 0);
    }

    #[tokio::test]
    async fn form_validation_rejects_short_descriptions() {
        let handler = handler_over(Arc::new(InMemoryStore::new()));
        let context = handler
            .start_application_creation(Role::CallCenter, 9, WorkflowType::TechnicalService)
            .await
            .unwrap();

        let mut bad = form();
        bad.description = "too short".to_string();
        let err = handler
            .process_application_form(&bad, &context)
            .await
            .unwrap_err();
        match err {
            EngineError::ValidationFailed { field, .. } => assert_eq!(field, "description"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn submit_creates_request_audit_row_and_receipt() {
        let store = Arc::new(InMemoryStore::new());
        let handler = handler_over(Arc::clone(&store));

        let context = handler
            .start_application_creation(Role::CallCenter, 9, WorkflowType::TechnicalService)
            .await
            .unwrap();
        let receipt = handler.validate_and_submit(&form(), &context).await.unwrap();

        assert_eq!(receipt.workflow_type, WorkflowType::TechnicalService);
        assert!(receipt.notification_sent);

        let request = store
            .get_request(&receipt.application_id)
            .await
            .unwrap()
            .unwrap();
        assert!(request.created_by_staff);
        assert_eq!(request.staff_creator_id, Some(9));
        assert_eq!(request.staff_creator_role, Some(Role::CallCenter));
        assert_eq!(request.creation_source, "call_center");
        assert_eq!(request.current_role, Role::Controller);
        assert!(request.client_notified_at.is_some());

        // The audit row exists and counts against today's quota.
        assert_eq!(
            store
                .count_staff_audits_on_day(9, Local::now().date_naive())
                .await
                .unwrap(),
            1
        );
    }
}
