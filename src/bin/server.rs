// Service Desk engine daemon
// Run with: cargo run --bin server

//! Engine daemon: connects the Postgres store, wires the engine components
//! leaf-first and runs the two background loops - the notification retry
//! drain and the stuck-workflow sweep - until a shutdown signal arrives.
//!
//! Notification delivery goes through the [`NotificationTransport`] seam;
//! this binary installs a logging transport so the daemon is fully
//! operational without the external messaging gateway. Deployments with a
//! gateway swap the transport at this one construction site.

use std::sync::Arc;

use anyhow::Result;
use dotenv::dotenv;
use tokio::sync::watch;
use tracing::{info, warn};

use service_desk::engine::notify::NotificationTransport;
use service_desk::models::{NotificationIntent, WorkflowRegistry};
use service_desk::{
    AccessControl, ClientResolver, EngineConfig, EnhancedStateManager, InventoryManager,
    NotificationSystem, PgStore, RecoverySystem, StaffApplicationHandler, StateManager, Store,
    WorkflowEngine,
};

/// Transport stand-in that logs every intent instead of delivering it.
struct LoggingTransport;

#[async_trait::async_trait]
impl NotificationTransport for LoggingTransport {
    async fn deliver(&self, intent: &NotificationIntent) -> Result<()> {
        info!(?intent, "notification intent emitted");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env first so RUST_LOG and SERVICE_DESK__* participate; a
    // missing file is fine.
    let _ = dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = EngineConfig::load()?;
    info!(database_url = %config.database_url, "starting service desk engine");

    let store: Arc<dyn Store> = {
        let pg = PgStore::connect(&config.database_url).await?;
        pg.migrate().await?;
        Arc::new(pg)
    };

    // Leaf-first construction; dependencies are explicit parameters.
    let registry = Arc::new(WorkflowRegistry::new());
    let state_manager = Arc::new(StateManager::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        &config,
    ));
    let enhanced = Arc::new(EnhancedStateManager::new(Arc::clone(&state_manager)));
    let access_control = Arc::new(AccessControl::new(Arc::clone(&store)));
    let notifications = Arc::new(NotificationSystem::new(
        Arc::clone(&store),
        Arc::new(LoggingTransport),
        config.notification.clone(),
    ));
    let inventory = Arc::new(InventoryManager::new(
        Arc::clone(&state_manager),
        Arc::clone(&notifications),
    ));
    let engine = Arc::new(WorkflowEngine::new(
        Arc::clone(&state_manager),
        Arc::clone(&registry),
        Arc::clone(&access_control),
        Arc::clone(&notifications),
        Arc::clone(&inventory),
    ));
    let resolver = Arc::new(ClientResolver::new(Arc::clone(&store)));
    let _staff_handler = Arc::new(StaffApplicationHandler::new(
        Arc::clone(&engine),
        resolver,
        Arc::clone(&access_control),
        Arc::clone(&store),
    ));
    let recovery = Arc::new(RecoverySystem::new(
        Arc::clone(&state_manager),
        enhanced,
        Arc::clone(&engine),
        config.recovery.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let drain_handle = Arc::clone(&notifications).spawn_drain_loop(shutdown_rx.clone());

    // Periodic stuck-workflow sweep: report-only; recovery stays
    // admin-invoked through the CLI.
    let sweep_handle = {
        let recovery = Arc::clone(&recovery);
        let mut shutdown = shutdown_rx.clone();
        let interval = std::time::Duration::from_secs(config.recovery.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => match recovery.detect_stuck().await {
                        Ok(stuck) if !stuck.is_empty() => {
                            for workflow in &stuck {
                                warn!(
                                    request_id = %workflow.request_id,
                                    role = %workflow.current_role,
                                    hours = workflow.stuck_duration_hours,
                                    "workflow stuck"
                                );
                            }
                        }
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "stuck-workflow sweep failed"),
                    },
                    _ = shutdown.changed() => break,
                }
            }
        })
    };

    info!("engine running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    info!("shutdown signal received, stopping background loops");
    let _ = shutdown_tx.send(true);
    let _ = drain_handle.await;
    let _ = sweep_handle.await;
    info!("engine stopped");
    Ok(())
}
