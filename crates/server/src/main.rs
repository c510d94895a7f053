//! lapse server entry point.

use std::sync::Arc;

use axum::Router;
use lapse_api::{AdminGate, AppState, router as api_router};
use lapse_common::Config;
use lapse_core::{
    AccountLifecycleService, GroupActionExecutor, JobSettings, ReconciliationJob, RunHistory,
};
use lapse_db::SeaOrmGateway;
use lapse_db::repositories::{AccountRepository, GroupRepository};
use lapse_queue::{
    LocalRunLock, ReconciliationTrigger, RedisRunLock, RunLock, SchedulerConfig, run_scheduler,
};
use tokio::signal;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

/// Plain text logs by default, JSON lines with `LAPSE_LOG_FORMAT=json`.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lapse=info,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    let json = std::env::var("LAPSE_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run_lock(config: &Config) -> anyhow::Result<Arc<dyn RunLock>> {
    match config.redis.url.as_deref() {
        Some(url) => {
            let lock = RedisRunLock::connect(
                url,
                &config.redis.prefix,
                config.reconciliation.run_lock_ttl_secs,
            )
            .await?;
            Ok(Arc::new(lock))
        }
        None => {
            info!("No Redis configured, using in-process run lock");
            Ok(Arc::new(LocalRunLock::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting lapse...");

    // Load configuration
    let config = Config::load()?;
    info!(environment = %config.environment, "Configuration loaded");

    // Connect to database
    let db = Arc::new(lapse_db::init(&config).await?);
    info!("Connected to database");

    // Run migrations
    lapse_db::migrate(&db).await?;
    info!("Migrations completed");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Reconciliation job
    let settings = JobSettings::from(&config.reconciliation);
    let job = ReconciliationJob::new(
        Arc::new(SeaOrmGateway::new(db.clone())),
        Arc::new(GroupActionExecutor::new(db.clone())),
        settings,
        shutdown_rx.clone(),
    );
    info!(
        grace_period_days = config.reconciliation.grace_period_days,
        concurrency = settings.concurrency,
        "Reconciliation job configured"
    );

    let trigger = ReconciliationTrigger::new(
        Arc::new(job),
        run_lock(&config).await?,
        RunHistory::new(config.reconciliation.history_size),
    );

    let scheduler = run_scheduler(
        SchedulerConfig::from(&config.reconciliation),
        Arc::new(trigger.clone()),
        shutdown_rx,
    );

    let state = AppState {
        trigger,
        lifecycle_service: AccountLifecycleService::new(
            AccountRepository::new(db.clone()),
            GroupRepository::new(db),
        ),
        admin: AdminGate::from_config(&config),
    };
    if state.admin == AdminGate::Open {
        info!("No admin token configured, admin API open in development");
    }

    let app = Router::new()
        .nest("/api", api_router(&state))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server with graceful shutdown
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Let an in-flight run finish its current accounts
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            error!(error = %e, "Scheduler task ended abnormally");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}
