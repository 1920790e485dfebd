//! Process bootstrap: load config, rehydrate live state from persistence,
//! spawn the dispatcher and health-check activities, and serve the HTTP
//! router until shutdown.

use crate::routes::create_router;
use crate::state::AppState;
use dispatch_core::config::ProcessConfig;
use dispatch_core::repository::SqliteRepository;
use dispatch_core::{Dispatcher, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

pub async fn run(process_config: ProcessConfig) -> Result<()> {
    let database_url = process_config
        .database_url
        .clone()
        .unwrap_or_else(|| "sqlite::memory:".to_string());
    let repo = Arc::new(SqliteRepository::connect(&database_url).await?);

    let scheduler_config = repo.load().await?;
    let dispatcher = Arc::new(Dispatcher::new(scheduler_config, repo.clone(), repo.clone()));

    for worker in repo.list().await? {
        dispatcher.pool.insert(worker);
    }

    let state = AppState::new(dispatcher.clone(), repo.clone(), repo.clone(), repo.clone());
    let app = create_router(state);

    let dispatch_handle = tokio::spawn(dispatcher.clone().run());
    let health_handle = tokio::spawn(dispatcher.clone().run_health_check());

    let addr = SocketAddr::from((
        process_config
            .host
            .parse::<std::net::IpAddr>()
            .map_err(|e| dispatch_core::Error::Other(format!("invalid host: {e}")))?,
        process_config.port,
    ));

    info!("dispatch API listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| dispatch_core::Error::Other(format!("failed to bind {addr}: {e}")))?;

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = server.await {
        error!(error = %e, "http server error");
    }

    dispatcher.request_shutdown();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), dispatch_handle).await;
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), health_handle).await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
