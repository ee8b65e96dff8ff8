//! pbxwatch server binary: live PBX agent/call/queue monitoring.
//!
//! Starts the manager-interface ingestion task, the reconciliation sweep,
//! and an axum HTTP server with structured logging, database
//! initialization, and graceful shutdown on SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pbxwatch_ami::{BootstrapPlan, ConnectOptions, ManagerClient};
use pbxwatch_monitor::{
    IpCache, Monitor, Normalizer, NormalizerOptions, OperatorCommands, SqliteDirectory,
    TenantCache, TenantResolver,
};
use pbxwatch_server::background::{self, IngestionSettings};
use pbxwatch_server::{app, config, AppState};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("PBXWATCH_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration: the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // Initialize database
    let pool = pbxwatch_db::create_pool(
        &config.database.path,
        pbxwatch_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to create database pool: check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied =
            pbxwatch_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    // Monitoring core
    let monitor = Arc::new(Monitor::new());
    let resolver = TenantResolver::new(
        Arc::new(SqliteDirectory::new(pool.clone())),
        Arc::new(TenantCache::new()),
    );
    let normalizer = Arc::new(Normalizer::new(
        monitor.clone(),
        resolver,
        Arc::new(IpCache::new()),
        NormalizerOptions {
            presence_clears_ringing: config.monitor.presence_clears_ringing,
        },
    ));
    let client = ManagerClient::new();

    if config.ami.username.is_empty() {
        tracing::warn!("ami.username is empty; the PBX will likely reject the login");
    }
    let ingestion = IngestionSettings {
        connect: ConnectOptions {
            addr: config.ami.addr.clone(),
            username: config.ami.username.clone(),
            secret: config.ami.secret.clone(),
            connect_timeout: config.ami.connect_timeout(),
        },
        bootstrap: BootstrapPlan {
            initial_delay: Duration::from_millis(config.ami.bootstrap_delay_ms),
            contacts_retry_delay: Duration::from_millis(config.ami.contacts_retry_delay_ms),
        },
        reconnect_initial: config.ami.reconnect_initial(),
        reconnect_max: config.ami.reconnect_max(),
    };
    tokio::spawn(background::run_ingestion(
        client.clone(),
        normalizer.clone(),
        ingestion,
    ));
    tokio::spawn(background::start_sweep_task(
        client.clone(),
        normalizer,
        config.monitor.sweep_interval_secs,
    ));

    // Build application
    let state = AppState {
        commands: OperatorCommands::new(monitor.clone(), client, pool),
        monitor,
        keepalive: Duration::from_secs(config.monitor.keepalive_secs.max(1)),
    };
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting pbxwatch server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address: is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("pbxwatch server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
