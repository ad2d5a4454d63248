use anyhow::Context;
use issue_desk::{
    AppState,
    bootstrap::seed_admin,
    config::{AppConfig, Env},
    create_router, init_tracing,
    db::Database,
    repository::{MySqlRepository, RepositoryState},
    storage::{FileStoreState, LocalFileStore},
};
use std::{process::ExitCode, sync::Arc};
use tokio::net::TcpListener;

/// main
///
/// Entry point: configuration, logging, database, storage, then the HTTP
/// server. An invalid configuration stops the process before anything else.
#[tokio::main]
async fn main() -> ExitCode {
    // 1. Configuration & Environment Loading (Fail-Fast)
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // 2. Logging, pretty in development and JSON elsewhere.
    init_tracing(&config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!(env = config.env.as_str(), "{} {} starting", config.app.name, config.app.version);

    // 3. Database Initialization (MySQL)
    let db = Database::connect(&config.database)
        .await
        .context("failed to connect to the database")?;

    // DEVELOPMENT-ONLY: create missing tables. A failure is logged, not fatal.
    if config.env == Env::Development {
        if let Err(e) = db.create_schema().await {
            tracing::error!(error = %e, "error creating database tables");
        }
    }

    let repo = Arc::new(MySqlRepository::new(db)) as RepositoryState;

    if let Some(admin) = &config.bootstrap_admin {
        seed_admin(repo.as_ref(), admin)
            .await
            .context("failed to create the bootstrap administrator")?;
    }

    // 4. Storage Initialization
    let files = Arc::new(LocalFileStore::new(&config.upload.dir)) as FileStoreState;

    // 5. Router and Server Startup
    let addr = config.bind_address();
    let app = create_router(AppState::new(config, repo, files));

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("listening on {addr}");
    tracing::info!("API documentation (Swagger UI) available at http://{addr}/swagger-ui");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for ctrl_c: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::warn!("failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
