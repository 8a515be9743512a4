use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ditchnet_core::runner::process::ProcessRunner;
use ditchnet_db::PgJobStore;
use ditchnet_worker::config::SchedulerConfig;
use ditchnet_worker::Scheduler;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ditchnet_api::config::ServerConfig;
use ditchnet_api::router::build_app_router;
use ditchnet_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "ditchnet_api=debug,ditchnet_worker=debug,ditchnet_core=info,tower_http=debug".into()
    });
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // --- Configuration ---
    let config = ServerConfig::from_env().unwrap_or_else(|e| panic!("Invalid configuration: {e}"));
    let scheduler_config =
        SchedulerConfig::from_env().unwrap_or_else(|e| panic!("Invalid configuration: {e}"));
    tracing::info!(
        host = %config.host,
        port = %config.port,
        storage = %scheduler_config.storage_root.path().display(),
        max_concurrent_jobs = scheduler_config.max_concurrent_jobs,
        "Loaded configuration",
    );

    tokio::fs::create_dir_all(scheduler_config.storage_root.path())
        .await
        .expect("Failed to create storage root");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = ditchnet_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    ditchnet_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    ditchnet_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    let store = Arc::new(PgJobStore::new(pool));

    // --- Scheduler ---
    let runner = ProcessRunner::from_template(
        scheduler_config.runner_program.clone(),
        &scheduler_config.runner_args,
    )
    .with_stop_template(&scheduler_config.runner_stop_args);
    tracing::info!(program = runner.program(), "Job runner configured");
    let scheduler = Scheduler::start(store.clone(), Arc::new(runner), &scheduler_config).await;
    tracing::info!("Scheduler started");

    // --- App state ---
    let state = AppState {
        store,
        storage: scheduler_config.storage_root.clone(),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, stopping scheduler");

    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    if !scheduler.shutdown(grace).await {
        tracing::warn!("Running jobs were abandoned; they are recovered on next start");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
