//! Service Desk Admin CLI
//!
//! Administrative operations over the engine's store: stuck-workflow
//! detection, recovery, inventory reconciliation, health and the
//! notification retry queue.
//!
//! Exit codes: 0 success, 2 invalid arguments, 3 permission denied,
//! 4 not found.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tracing::error;

use service_desk::engine::notify::NotificationTransport;
use service_desk::models::{NotificationIntent, Role, WorkflowRegistry};
use service_desk::{
    AccessControl, EngineConfig, EngineError, EnhancedStateManager, InventoryManager,
    NotificationSystem, PgStore, RecoveryOption, RecoverySystem, StateManager, Store,
    WorkflowEngine,
};

const EXIT_INVALID_ARGS: u8 = 2;
const EXIT_PERMISSION_DENIED: u8 = 3;
const EXIT_NOT_FOUND: u8 = 4;

#[derive(Parser)]
#[command(name = "service-desk-admin")]
#[command(about = "Service Desk Admin CLI - workflow recovery and system maintenance")]
#[command(version = "1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Postgres connection string
    #[arg(long, env = "SERVICE_DESK__DATABASE_URL")]
    database_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List in-progress workflows past the staleness threshold
    #[command(alias = "detect_stuck")]
    DetectStuck,

    /// Apply a recovery option to a request
    Recover {
        request_id: String,

        /// One of: force_transition, reset_to_previous_state,
        /// complete_workflow, reassign_role
        option: String,

        /// Target role for force_transition
        #[arg(long)]
        target_role: Option<String>,

        /// Target user for reassign_role
        #[arg(long)]
        target_user_id: Option<i64>,

        /// Acting admin user id
        #[arg(long, default_value_t = 0)]
        admin_id: i64,
    },

    /// Consume equipment for completed requests that missed it
    #[command(alias = "reconcile_inventory")]
    ReconcileInventory,

    /// Print the system health report
    Health,

    /// List queued notification retries
    #[command(alias = "show_retries")]
    ShowRetries,
}

/// Admin runs deliver nothing; queued retries stay queued for the daemon.
struct NoopTransport;

#[async_trait::async_trait]
impl NotificationTransport for NoopTransport {
    async fn deliver(&self, _intent: &NotificationIntent) -> anyhow::Result<()> {
        Ok(())
    }
}

struct AdminContext {
    store: Arc<dyn Store>,
    inventory: Arc<InventoryManager>,
    recovery: Arc<RecoverySystem>,
}

async fn build_context(config: &EngineConfig) -> anyhow::Result<AdminContext> {
    let store: Arc<dyn Store> = {
        let pg = PgStore::connect(&config.database_url).await?;
        pg.migrate().await?;
        Arc::new(pg)
    };

    let registry = Arc::new(WorkflowRegistry::new());
    let state_manager = Arc::new(StateManager::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        config,
    ));
    let enhanced = Arc::new(EnhancedStateManager::new(Arc::clone(&state_manager)));
    let notifications = Arc::new(NotificationSystem::new(
        Arc::clone(&store),
        Arc::new(NoopTransport),
        config.notification.clone(),
    ));
    let inventory = Arc::new(InventoryManager::new(
        Arc::clone(&state_manager),
        Arc::clone(&notifications),
    ));
    let engine = Arc::new(WorkflowEngine::new(
        Arc::clone(&state_manager),
        registry,
        Arc::new(AccessControl::new(Arc::clone(&store))),
        notifications,
        Arc::clone(&inventory),
    ));
    let recovery = Arc::new(RecoverySystem::new(
        state_manager,
        enhanced,
        engine,
        config.recovery.clone(),
    ));

    Ok(AdminContext {
        store,
        inventory,
        recovery,
    })
}

fn parse_recovery_option(
    option: &str,
    target_role: Option<&str>,
    target_user_id: Option<i64>,
) -> Result<RecoveryOption, String> {
    match option {
        "force_transition" => {
            let role = target_role.ok_or("force_transition requires --target-role")?;
            let role = role
                .parse::<Role>()
                .map_err(|err| format!("invalid --target-role: {err}"))?;
            Ok(RecoveryOption::ForceTransition { target_role: role })
        }
        "reset_to_previous_state" => Ok(RecoveryOption::ResetToPreviousState),
        "complete_workflow" => Ok(RecoveryOption::CompleteWorkflow),
        "reassign_role" => {
            let user = target_user_id.ok_or("reassign_role requires --target-user-id")?;
            Ok(RecoveryOption::ReassignRole {
                target_user_id: user,
            })
        }
        other => Err(format!("unknown recovery option '{other}'")),
    }
}

fn exit_code_for(err: &EngineError) -> u8 {
    match err {
        EngineError::PermissionDenied(_) | EngineError::DailyLimitExceeded { .. } => {
            EXIT_PERMISSION_DENIED
        }
        EngineError::RequestNotFound(_) | EngineError::UserNotFound(_) => EXIT_NOT_FOUND,
        EngineError::ValidationFailed { .. } | EngineError::UnknownWorkflow(_) => EXIT_INVALID_ARGS,
        _ => 1,
    }
}

async fn run(cli: Cli) -> Result<(), u8> {
    let mut config = EngineConfig::load().map_err(|err| {
        error!(error = %err, "failed to load configuration");
        1u8
    })?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    let context = build_context(&config).await.map_err(|err| {
        error!(error = %err, "failed to connect to the store");
        1u8
    })?;

    match cli.command {
        Commands::DetectStuck => {
            let stuck = context.recovery.detect_stuck().await.map_err(|err| {
                error!(error = %err, "detection failed");
                exit_code_for(&err)
            })?;
            if stuck.is_empty() {
                println!("no stuck workflows");
            } else {
                println!("{} stuck workflow(s):", stuck.len());
                for workflow in stuck {
                    println!(
                        "  {}  {}  role={}  stuck={}h  {}",
                        workflow.request_id,
                        workflow.workflow_type,
                        workflow.current_role,
                        workflow.stuck_duration_hours,
                        workflow.description_snippet
                    );
                }
            }
        }
        Commands::Recover {
            request_id,
            option,
            target_role,
            target_user_id,
            admin_id,
        } => {
            let option =
                parse_recovery_option(&option, target_role.as_deref(), target_user_id)
                    .map_err(|message| {
                        eprintln!("{message}");
                        EXIT_INVALID_ARGS
                    })?;
            context
                .recovery
                .recover(&request_id, option, admin_id)
                .await
                .map_err(|err| {
                    eprintln!("recovery failed: {err}");
                    exit_code_for(&err)
                })?;
            println!("recovered {request_id}");
        }
        Commands::ReconcileInventory => {
            let report = context.inventory.reconcile().await.map_err(|err| {
                eprintln!("reconciliation failed: {err}");
                exit_code_for(&err)
            })?;
            println!(
                "examined {}, reconciled {}, discrepancies {}",
                report.examined,
                report.reconciled,
                report.discrepancies.len()
            );
            for (request_id, item) in report.discrepancies {
                println!("  discrepancy: request {request_id} item {item}");
            }
        }
        Commands::Health => {
            let report = context.recovery.health().await.map_err(|err| {
                eprintln!("health check failed: {err}");
                exit_code_for(&err)
            })?;
            println!("status: {}", report.status.as_str());
            println!("active transactions: {}", report.active_transactions);
            println!(
                "pending notification retries: {}",
                report.pending_notification_retries
            );
            println!("errors (24h): {}", report.errors_last_24h);
            for (category, count) in &report.errors_by_category {
                println!("  {category}: {count}");
            }
            for (severity, count) in &report.errors_by_severity {
                println!("  severity {severity}: {count}");
            }
        }
        Commands::ShowRetries => {
            let retries = context.store.list_retries().await.map_err(|err| {
                eprintln!("listing retries failed: {err}");
                exit_code_for(&err)
            })?;
            if retries.is_empty() {
                println!("retry queue empty");
            } else {
                for entry in retries {
                    println!(
                        "  {}  role={}  attempts={}  next={}  last_error={}",
                        entry.request_id,
                        entry.intended_recipient_role,
                        entry.retry_count,
                        entry.next_retry_at,
                        entry.last_error
                    );
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenv();
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}
