use invitation_service::{
    build_router,
    config::InvitationServiceConfig,
    db,
    services::{
        metrics, Database, InvitationMailer, JwtService, MockMailer, RedisTokenStore, SmtpMailer,
    },
    AppState,
};
use service_core::observability::init_tracing;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::Notify;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = InvitationServiceConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    metrics::init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting invitation service"
    );

    let pool = db::create_pool(&config.database).await?;
    db::run_migrations(&pool).await?;
    let repo = Arc::new(Database::new(pool));
    tracing::info!("Database initialized successfully");

    let token_store = Arc::new(RedisTokenStore::new(&config.redis).await?);
    tracing::info!("Pending token store initialized");

    let mailer: Arc<dyn InvitationMailer> = match config.smtp.host {
        Some(_) => Arc::new(SmtpMailer::new(&config.smtp, &config.invitation.accept_url)?),
        None => {
            tracing::warn!("SMTP_HOST not set - invitation emails will be captured, not sent");
            Arc::new(MockMailer::new())
        }
    };

    let jwt = JwtService::new(&config.jwt)?;
    tracing::info!("JWT verifier initialized");

    let addr = config.common.socket_addr();
    let grace = Duration::from_secs(config.common.shutdown_grace_seconds);
    let state = AppState::new(config.clone(), repo, token_store, mailer, jwt);
    let app = build_router(state);

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let draining = Arc::new(Notify::new());
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown({
        let draining = draining.clone();
        async move {
            shutdown_signal().await;
            draining.notify_one();
        }
    })
    .into_future();

    match run_until_drained(server, draining, grace).await {
        Some(result) => {
            result?;
            tracing::info!("Service shutdown complete");
        }
        None => tracing::warn!(
            grace_seconds = grace.as_secs(),
            "In-flight requests still running after shutdown grace period, exiting"
        ),
    }
    Ok(())
}

/// Drive `server` to completion, but give up `grace` after `draining` fires.
async fn run_until_drained<F: Future>(
    server: F,
    draining: Arc<Notify>,
    grace: Duration,
) -> Option<F::Output> {
    tokio::select! {
        output = server => Some(output),
        _ = async {
            draining.notified().await;
            tokio::time::sleep(grace).await;
        } => None,
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
