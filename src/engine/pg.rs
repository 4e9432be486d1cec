// Postgres storage backend

//! # Postgres Store
//!
//! Production implementation of the [`Store`] trait over a single Postgres
//! database. Requests and their paired transition rows commit in one
//! transaction; per-request updates take the request row `FOR UPDATE`, which
//! serializes concurrent transitions on the same request - the losing writer
//! surfaces as a transient error and is retried by the state manager.
//!
//! `migrate` creates the schema. Enumerations are stored as their text tags;
//! the keyed maps (`contact_info`, `state_data`, `equipment_used`,
//! audit metadata, error context) are JSONB columns.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use crate::models::{
    ContactInfo, EquipmentItem, ErrorCategory, ErrorRecord, ErrorSeverity, InventoryMovement,
    NotificationRetryEntry, Priority, RequestStatus, Role, ServiceRequest, StaffApplicationAudit,
    StateData, StateTransition, User, WorkflowType,
};
use crate::{EngineError, Result};

use super::storage::{StockConsumption, Store};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS requests (
        id TEXT PRIMARY KEY,
        workflow_type TEXT NOT NULL,
        client_id BIGINT NOT NULL,
        "current_role" TEXT NOT NULL,
        current_status TEXT NOT NULL,
        priority TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        location TEXT NOT NULL DEFAULT '',
        contact_info JSONB NOT NULL DEFAULT '{}',
        state_data JSONB NOT NULL DEFAULT '{}',
        equipment_used JSONB NOT NULL DEFAULT '[]',
        inventory_updated BOOLEAN NOT NULL DEFAULT FALSE,
        completion_rating INT,
        feedback_comments TEXT,
        created_by_staff BOOLEAN NOT NULL DEFAULT FALSE,
        staff_creator_id BIGINT,
        staff_creator_role TEXT,
        creation_source TEXT NOT NULL DEFAULT 'client',
        client_notified_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS state_transitions (
        id BIGSERIAL PRIMARY KEY,
        request_id TEXT NOT NULL REFERENCES requests(id) ON DELETE CASCADE,
        from_role TEXT,
        to_role TEXT,
        action TEXT NOT NULL,
        actor_id BIGINT,
        transition_data JSONB NOT NULL DEFAULT '{}',
        comments TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_transitions_request
        ON state_transitions (request_id, created_at, id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        phone_normalised TEXT NOT NULL UNIQUE,
        full_name TEXT NOT NULL,
        role TEXT NOT NULL,
        language TEXT NOT NULL DEFAULT 'uz',
        address TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS staff_application_audit (
        application_id TEXT NOT NULL REFERENCES requests(id) ON DELETE CASCADE,
        creator_id BIGINT NOT NULL,
        creator_role TEXT NOT NULL,
        client_id BIGINT NOT NULL,
        application_type TEXT NOT NULL,
        creation_timestamp TIMESTAMPTZ NOT NULL,
        client_notified BOOLEAN NOT NULL DEFAULT FALSE,
        workflow_initiated BOOLEAN NOT NULL DEFAULT FALSE,
        metadata JSONB NOT NULL DEFAULT '{}'
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_staff_audit_creator_day
        ON staff_application_audit (creator_id, creation_timestamp)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS notification_retries (
        request_id TEXT NOT NULL,
        intended_recipient_role TEXT NOT NULL,
        retry_count INT NOT NULL DEFAULT 0,
        next_retry_at TIMESTAMPTZ NOT NULL,
        last_error TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (request_id, intended_recipient_role)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS error_records (
        id BIGSERIAL PRIMARY KEY,
        category TEXT NOT NULL,
        severity TEXT NOT NULL,
        message TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        resolved_at TIMESTAMPTZ,
        context JSONB NOT NULL DEFAULT '{}'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS equipment_stock (
        name TEXT PRIMARY KEY,
        quantity INT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS inventory_movements (
        id BIGSERIAL PRIMARY KEY,
        request_id TEXT NOT NULL,
        item_name TEXT NOT NULL,
        quantity INT NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL
    )
    "#,
];

/// Postgres-backed [`Store`].
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    /// Connect with a small pool sized for the single-process engine.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(PgStore { pool })
    }

    /// Create the schema if it does not exist.
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn parse<T: std::str::FromStr<Err = String>>(tag: &str) -> Result<T> {
        tag.parse().map_err(EngineError::Invariant)
    }

    fn request_from_row(row: &PgRow) -> Result<ServiceRequest> {
        let workflow_type: String = row.try_get("workflow_type")?;
        let current_role: String = row.try_get("current_role")?;
        let current_status: String = row.try_get("current_status")?;
        let priority: String = row.try_get("priority")?;
        let staff_creator_role: Option<String> = row.try_get("staff_creator_role")?;

        let contact_info: serde_json::Value = row.try_get("contact_info")?;
        let state_data: serde_json::Value = row.try_get("state_data")?;
        let equipment_used: serde_json::Value = row.try_get("equipment_used")?;
        let completion_rating: Option<i32> = row.try_get("completion_rating")?;

        Ok(ServiceRequest {
            id: row.try_get("id")?,
            workflow_type: Self::parse::<WorkflowType>(&workflow_type)?,
            client_id: row.try_get("client_id")?,
            current_role: Self::parse::<Role>(&current_role)?,
            current_status: Self::parse::<RequestStatus>(&current_status)?,
            priority: Self::parse::<Priority>(&priority)?,
            description: row.try_get("description")?,
            location: row.try_get("location")?,
            contact_info: serde_json::from_value::<ContactInfo>(contact_info)?,
            state_data: serde_json::from_value::<StateData>(state_data)?,
            equipment_used: serde_json::from_value::<Vec<EquipmentItem>>(equipment_used)?,
            inventory_updated: row.try_get("inventory_updated")?,
            completion_rating: completion_rating.map(|r| r as u8),
            feedback_comments: row.try_get("feedback_comments")?,
            created_by_staff: row.try_get("created_by_staff")?,
            staff_creator_id: row.try_get("staff_creator_id")?,
            staff_creator_role: staff_creator_role
                .map(|tag| Self::parse::<Role>(&tag))
                .transpose()?,
            creation_source: row.try_get("creation_source")?,
            client_notified_at: row.try_get("client_notified_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn transition_from_row(row: &PgRow) -> Result<StateTransition> {
        let from_role: Option<String> = row.try_get("from_role")?;
        let to_role: Option<String> = row.try_get("to_role")?;
        let transition_data: serde_json::Value = row.try_get("transition_data")?;

        Ok(StateTransition {
            id: row.try_get("id")?,
            request_id: row.try_get("request_id")?,
            from_role: from_role.map(|tag| Self::parse::<Role>(&tag)).transpose()?,
            to_role: to_role.map(|tag| Self::parse::<Role>(&tag)).transpose()?,
            action: row.try_get("action")?,
            actor_id: row.try_get("actor_id")?,
            transition_data: serde_json::from_value(transition_data)?,
            comments: row.try_get("comments")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn user_from_row(row: &PgRow) -> Result<User> {
        let role: String = row.try_get("role")?;
        Ok(User {
            id: row.try_get("id")?,
            phone_normalised: row.try_get("phone_normalised")?,
            full_name: row.try_get("full_name")?,
            role: Self::parse::<Role>(&role)?,
            language: row.try_get("language")?,
            address: row.try_get("address")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn retry_from_row(row: &PgRow) -> Result<NotificationRetryEntry> {
        let role: String = row.try_get("intended_recipient_role")?;
        let retry_count: i32 = row.try_get("retry_count")?;
        Ok(NotificationRetryEntry {
            request_id: row.try_get("request_id")?,
            intended_recipient_role: Self::parse::<Role>(&role)?,
            retry_count: retry_count as u32,
            next_retry_at: row.try_get("next_retry_at")?,
            last_error: row.try_get("last_error")?,
        })
    }

    fn error_from_row(row: &PgRow) -> Result<ErrorRecord> {
        let category: String = row.try_get("category")?;
        let severity: String = row.try_get("severity")?;
        let context: serde_json::Value = row.try_get("context")?;
        Ok(ErrorRecord {
            category: Self::parse::<ErrorCategory>(&category)?,
            severity: Self::parse::<ErrorSeverity>(&severity)?,
            message: row.try_get("message")?,
            created_at: row.try_get("created_at")?,
            resolved_at: row.try_get("resolved_at")?,
            context: serde_json::from_value(context)?,
        })
    }

    async fn insert_transition_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        transition: &StateTransition,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO state_transitions (
                request_id, from_role, to_role, action, actor_id,
                transition_data, comments, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&transition.request_id)
        .bind(transition.from_role.map(|r| r.as_str()))
        .bind(transition.to_role.map(|r| r.as_str()))
        .bind(&transition.action)
        .bind(transition.actor_id)
        .bind(serde_json::Value::Object(transition.transition_data.clone()))
        .bind(&transition.comments)
        .bind(transition.created_at)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn write_request_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        request: &ServiceRequest,
        insert: bool,
    ) -> Result<()> {
        let query = if insert {
            r#"
            INSERT INTO requests (
                id, workflow_type, client_id, "current_role", current_status,
                priority, description, location, contact_info, state_data,
                equipment_used, inventory_updated, completion_rating,
                feedback_comments, created_by_staff, staff_creator_id,
                staff_creator_role, creation_source, client_notified_at,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                      $13, $14, $15, $16, $17, $18, $19, $20, $21)
            "#
        } else {
            r#"
            UPDATE requests SET
                workflow_type = $2, client_id = $3, "current_role" = $4,
                current_status = $5, priority = $6, description = $7,
                location = $8, contact_info = $9, state_data = $10,
                equipment_used = $11, inventory_updated = $12,
                completion_rating = $13, feedback_comments = $14,
                created_by_staff = $15, staff_creator_id = $16,
                staff_creator_role = $17, creation_source = $18,
                client_notified_at = $19, created_at = $20, updated_at = $21
            WHERE id = $1
            "#
        };

        sqlx::query(query)
            .bind(&request.id)
            .bind(request.workflow_type.as_str())
            .bind(request.client_id)
            .bind(request.current_role.as_str())
            .bind(request.current_status.as_str())
            .bind(request.priority.as_str())
            .bind(&request.description)
            .bind(&request.location)
            .bind(serde_json::to_value(&request.contact_info)?)
            .bind(serde_json::to_value(&request.state_data)?)
            .bind(serde_json::to_value(&request.equipment_used)?)
            .bind(request.inventory_updated)
            .bind(request.completion_rating.map(|r| r as i32))
            .bind(&request.feedback_comments)
            .bind(request.created_by_staff)
            .bind(request.staff_creator_id)
            .bind(request.staff_creator_role.map(|r| r.as_str()))
            .bind(&request.creation_source)
            .bind(request.client_notified_at)
            .bind(request.created_at)
            .bind(request.updated_at)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn insert_request(
        &self,
        request: &ServiceRequest,
        initiation: &StateTransition,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        Self::write_request_tx(&mut tx, request, true).await?;
        let id = Self::insert_transition_tx(&mut tx, initiation).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn get_request(&self, id: &str) -> Result<Option<ServiceRequest>> {
        let row = sqlx::query("SELECT * FROM requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::request_from_row(&r)).transpose()
    }

    async fn update_request(
        &self,
        request: &ServiceRequest,
        transition: Option<&StateTransition>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT id FROM requests WHERE id = $1 FOR UPDATE")
            .bind(&request.id)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_none() {
            return Err(EngineError::RequestNotFound(request.id.clone()));
        }

        Self::write_request_tx(&mut tx, request, false).await?;
        if let Some(transition) = transition {
            Self::insert_transition_tx(&mut tx, transition).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_requests_by_role(
        &self,
        role: Role,
        status: Option<RequestStatus>,
    ) -> Result<Vec<ServiceRequest>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    r#"
                    SELECT * FROM requests
                    WHERE "current_role" = $1 AND current_status = $2
                    ORDER BY CASE priority
                        WHEN 'urgent' THEN 3 WHEN 'high' THEN 2
                        WHEN 'medium' THEN 1 ELSE 0 END DESC,
                        created_at ASC
                    "#,
                )
                .bind(role.as_str())
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM requests
                    WHERE "current_role" = $1
                    ORDER BY CASE priority
                        WHEN 'urgent' THEN 3 WHEN 'high' THEN 2
                        WHEN 'medium' THEN 1 ELSE 0 END DESC,
                        created_at ASC
                    "#,
                )
                .bind(role.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(Self::request_from_row).collect()
    }

    async fn list_requests_by_client(&self, client_id: i64) -> Result<Vec<ServiceRequest>> {
        let rows =
            sqlx::query("SELECT * FROM requests WHERE client_id = $1 ORDER BY created_at DESC")
                .bind(client_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(Self::request_from_row).collect()
    }

    async fn list_requests_by_status(&self, status: RequestStatus) -> Result<Vec<ServiceRequest>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM requests
            WHERE current_status = $1
            ORDER BY CASE priority
                WHEN 'urgent' THEN 3 WHEN 'high' THEN 2
                WHEN 'medium' THEN 1 ELSE 0 END DESC,
                created_at ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::request_from_row).collect()
    }

    async fn delete_request(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM requests WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_transition(&self, transition: &StateTransition) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let id = Self::insert_transition_tx(&mut tx, transition).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn list_transitions(&self, request_id: &str) -> Result<Vec<StateTransition>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM state_transitions
            WHERE request_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::transition_from_row).collect()
    }

    async fn delete_transition(&self, transition_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM state_transitions WHERE id = $1")
            .bind(transition_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_user(&self, user: &User) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (
                phone_normalised, full_name, role, language, address,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&user.phone_normalised)
        .bind(&user.full_name)
        .bind(user.role.as_str())
        .bind(&user.language)
        .bind(&user.address)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::user_from_row(&r)).transpose()
    }

    async fn find_user_by_phone(&self, variants: &[String]) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE phone_normalised = ANY($1) LIMIT 1")
            .bind(variants)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::user_from_row(&r)).transpose()
    }

    async fn search_clients_by_name(&self, fragment: &str) -> Result<Vec<User>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM users
            WHERE role = 'client'
              AND LOWER(full_name) LIKE '%' || LOWER($1) || '%'
            "#,
        )
        .bind(fragment)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::user_from_row).collect()
    }

    async fn insert_staff_audit(&self, audit: &StaffApplicationAudit) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO staff_application_audit (
                application_id, creator_id, creator_role, client_id,
                application_type, creation_timestamp, client_notified,
                workflow_initiated, metadata
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&audit.application_id)
        .bind(audit.creator_id)
        .bind(audit.creator_role.as_str())
        .bind(audit.client_id)
        .bind(audit.application_type.as_str())
        .bind(audit.creation_timestamp)
        .bind(audit.client_notified)
        .bind(audit.workflow_initiated)
        .bind(serde_json::Value::Object(audit.metadata.clone()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_staff_audits_on_day(&self, creator_id: i64, day: NaiveDate) -> Result<u32> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count FROM staff_application_audit
            WHERE creator_id = $1 AND DATE(creation_timestamp) = $2
            "#,
        )
        .bind(creator_id)
        .bind(day)
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count as u32)
    }

    async fn mark_audit_client_notified(&self, application_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE staff_application_audit SET client_notified = TRUE WHERE application_id = $1",
        )
        .bind(application_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn push_retry(&self, entry: &NotificationRetryEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_retries (
                request_id, intended_recipient_role, retry_count,
                next_retry_at, last_error
            ) VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (request_id, intended_recipient_role) DO UPDATE SET
                retry_count = EXCLUDED.retry_count,
                next_retry_at = EXCLUDED.next_retry_at,
                last_error = EXCLUDED.last_error
            "#,
        )
        .bind(&entry.request_id)
        .bind(entry.intended_recipient_role.as_str())
        .bind(entry.retry_count as i32)
        .bind(entry.next_retry_at)
        .bind(&entry.last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn due_retries(
        &self,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<NotificationRetryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM notification_retries
            WHERE next_retry_at <= $1 AND retry_count < $2
            ORDER BY next_retry_at ASC
            "#,
        )
        .bind(now)
        .bind(max_attempts as i32)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::retry_from_row).collect()
    }

    async fn update_retry(&self, entry: &NotificationRetryEntry) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notification_retries
            SET retry_count = $3, next_retry_at = $4, last_error = $5
            WHERE request_id = $1 AND intended_recipient_role = $2
            "#,
        )
        .bind(&entry.request_id)
        .bind(entry.intended_recipient_role.as_str())
        .bind(entry.retry_count as i32)
        .bind(entry.next_retry_at)
        .bind(&entry.last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_retry(&self, request_id: &str, role: Role) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM notification_retries
            WHERE request_id = $1 AND intended_recipient_role = $2
            "#,
        )
        .bind(request_id)
        .bind(role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_retries(&self) -> Result<Vec<NotificationRetryEntry>> {
        let rows = sqlx::query("SELECT * FROM notification_retries ORDER BY next_retry_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::retry_from_row).collect()
    }

    async fn insert_error_record(&self, record: &ErrorRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO error_records (
                category, severity, message, created_at, resolved_at, context
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.category.as_str())
        .bind(record.severity.as_str())
        .bind(&record.message)
        .bind(record.created_at)
        .bind(record.resolved_at)
        .bind(serde_json::Value::Object(record.context.clone()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_error_records(&self, since: DateTime<Utc>) -> Result<Vec<ErrorRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM error_records WHERE created_at >= $1 ORDER BY created_at DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::error_from_row).collect()
    }

    async fn set_stock_level(&self, name: &str, quantity: u32) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO equipment_stock (name, quantity) VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET quantity = EXCLUDED.quantity
            "#,
        )
        .bind(name)
        .bind(quantity as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn stock_level(&self, name: &str) -> Result<Option<u32>> {
        let row = sqlx::query("SELECT quantity FROM equipment_stock WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .map(|r| r.try_get::<i32, _>("quantity"))
            .transpose()?
            .map(|q| q.max(0) as u32))
    }

    async fn consume_stock(
        &self,
        request_id: &str,
        name: &str,
        quantity: u32,
    ) -> Result<StockConsumption> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT quantity FROM equipment_stock WHERE name = $1 FOR UPDATE")
            .bind(name)
            .fetch_optional(&mut *tx)
            .await?;
        let available = row
            .map(|r| r.try_get::<i32, _>("quantity"))
            .transpose()?
            .unwrap_or(0)
            .max(0) as u32;

        if available < quantity {
            return Ok(StockConsumption::Short { available });
        }

        let remaining = available - quantity;
        sqlx::query("UPDATE equipment_stock SET quantity = $2 WHERE name = $1")
            .bind(name)
            .bind(remaining as i32)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO inventory_movements (request_id, item_name, quantity, recorded_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(request_id)
        .bind(name)
        .bind(quantity as i32)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(StockConsumption::Consumed { remaining })
    }

    async fn list_inventory_movements(&self, request_id: &str) -> Result<Vec<InventoryMovement>> {
        let rows = sqlx::query(
            r#"
            SELECT request_id, item_name, quantity, recorded_at
            FROM inventory_movements
            WHERE request_id = $1
            ORDER BY recorded_at ASC, id ASC
            "#,
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let quantity: i32 = row.try_get("quantity")?;
                Ok(InventoryMovement {
                    request_id: row.try_get("request_id")?,
                    item_name: row.try_get("item_name")?,
                    quantity: quantity.max(0) as u32,
                    recorded_at: row.try_get("recorded_at")?,
                })
            })
            .collect()
    }
}
