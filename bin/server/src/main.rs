use rootcause::prelude::*;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use waypoint_ai::build_backend;
use waypoint_conversation::{SessionStore, SqliteSessionStore};
use waypoint_server::{config::ServerConfig, error::StartupError, routes, state::AppState};
use waypoint_tools::McpConnection;
use waypoint_workflow::WorkflowEngine;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> waypoint_core::Result<(), StartupError> {
    // Load configuration from environment
    let config = ServerConfig::from_env().map_err(|e| StartupError::Config {
        details: e.to_string(),
    })?;
    tracing::info!("Loaded configuration");

    let store = SqliteSessionStore::connect(&config.database_url)
        .await
        .context(StartupError::Database {
            url: config.database_url.clone(),
        })?;
    let store: Arc<dyn SessionStore> = Arc::new(store);

    let backend = build_backend(&config.llm).map_err(|e| StartupError::Llm {
        details: e.to_string(),
    })?;
    tracing::info!(provider = %config.llm.provider, model = %config.llm.model, "LLM backend ready");

    let engine_config = config.engine_config();
    let tools = Arc::new(
        McpConnection::new(config.tools.endpoint.clone())
            .with_request_timeout(engine_config.tool_timeout),
    );
    let engine = WorkflowEngine::new(Arc::clone(&store), backend, tools.clone(), engine_config);

    // Spawn periodic snapshot expiry; the first tick runs immediately
    let retention = chrono::Duration::days(config.sessions.retention_days);
    let cleanup_interval = Duration::from_secs(config.sessions.cleanup_interval_seconds);
    let cleanup_store = Arc::clone(&store);
    let cleanup = tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);
        loop {
            interval.tick().await;
            match cleanup_store.expire_older_than(retention).await {
                Ok(count) if count > 0 => {
                    tracing::info!(expired_records = count, "Expired old session records");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = ?e, "Failed to expire old session records");
                }
            }
        }
    });

    let app = routes::router(Arc::new(AppState::new(engine)));

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .map_err(|e| StartupError::Bind {
            addr: config.listen_addr.clone(),
            details: e.to_string(),
        })?;

    tracing::info!("listening on http://{}", config.listen_addr);

    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    cleanup.abort();
    if let Err(e) = tools.close().await {
        tracing::warn!(error = %e, "Failed to release tool server session");
    }

    served.map_err(|e| StartupError::Serve {
        details: e.to_string(),
    })?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
