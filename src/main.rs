use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use secrecy::ExposeSecret;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use mail_tasks::config::AppConfig;
use mail_tasks::llm::create_provider;
use mail_tasks::mail::{GraphClient, MailProvider};
use mail_tasks::oauth::{OAuthRouteState, TokenManager, oauth_routes};
use mail_tasks::pipeline::{IngestionScheduler, TaskClassifier, health_routes, spawn_ingestion_scheduler};
use mail_tasks::store::{Database, LibSqlBackend};
use mail_tasks::tasks::{TaskRouteState, TaskService, task_routes};
use mail_tasks::tenants::Tenant;
use mail_tasks::vault::CredentialVault;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export MAIL_TASKS_ENCRYPTION_KEY=... OPENAI_API_KEY=... MAIL_TASKS_OAUTH_CLIENT_ID=...");
        std::process::exit(1);
    });

    let _log_guard = init_tracing(config.log_dir.as_deref());

    eprintln!("📬 Mail Tasks v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!(
        "   Polling every {}s, lookback {} min",
        config.ingest.poll_interval.as_secs(),
        config.ingest.lookback_minutes
    );
    eprintln!("   API: http://0.0.0.0:{}/api/tasks", config.http_port);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    if let Some(name) = &config.bootstrap_tenant {
        ensure_tenant(db.as_ref(), name).await?;
    }

    // ── Providers ────────────────────────────────────────────────────────
    let vault = Arc::new(
        CredentialVault::from_secret(config.encryption_key.expose_secret())
            .context("invalid MAIL_TASKS_ENCRYPTION_KEY")?,
    );
    let mail: Arc<dyn MailProvider> = Arc::new(GraphClient::new(&config.oauth)?);
    let llm = create_provider(&config.llm)?;

    let tokens = Arc::new(TokenManager::new(
        Arc::clone(&db),
        vault,
        Arc::clone(&mail),
    ));

    // ── Ingestion ────────────────────────────────────────────────────────
    let scheduler = Arc::new(IngestionScheduler::new(
        Arc::clone(&db),
        Arc::clone(&tokens),
        Arc::clone(&mail),
        Arc::new(TaskClassifier::new(llm)),
        config.ingest.clone(),
    ));
    let (ingest_handle, ingest_stop) = spawn_ingestion_scheduler(Arc::clone(&scheduler));

    // ── HTTP ─────────────────────────────────────────────────────────────
    let service = Arc::new(TaskService::new(
        Arc::clone(&db),
        Arc::clone(&tokens),
        Arc::clone(&mail),
        config.panel_sender.clone(),
    ));
    let app = health_routes(scheduler)
        .merge(task_routes(TaskRouteState { service }))
        .merge(oauth_routes(OAuthRouteState {
            tokens,
            frontend_url: config.frontend_url.clone(),
        }))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("failed to bind port {}", config.http_port))?;
    tracing::info!(port = config.http_port, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ingest_stop.store(true, Ordering::Relaxed);
    ingest_handle.abort();
    let _ = ingest_handle.await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// stderr always; a daily-rolling file too when `log_dir` is set.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mail-tasks.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

async fn ensure_tenant(db: &dyn Database, name: &str) -> anyhow::Result<()> {
    if let Some(tenant) = db.find_tenant_by_name(name).await? {
        tracing::info!(tenant = %tenant.id, name, "Bootstrap tenant present");
        return Ok(());
    }
    let tenant = Tenant::new(name);
    db.create_tenant(&tenant).await?;
    eprintln!("   Created tenant {name} ({})", tenant.id);
    eprintln!(
        "   Connect its mailbox: GET /api/auth/authorize?tenant={}",
        tenant.id
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
