use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use magicroom::config::Config;
use magicroom::db::{create_pool, init_db, queries, AppState};
use magicroom::handlers;
use magicroom::providers::{
    ClerkSessions, ReplicateClient, StorageClient, StripeClient, StripeConfig,
};
use magicroom::rate_limit::RateLimiter;

/// Webhook dedup markers live for 24 hours.
const WEBHOOK_EVENT_TTL_SECS: i64 = 24 * 3600;

#[derive(Parser, Debug)]
#[command(name = "magicroom")]
#[command(about = "Credit-based AI interior design generation backend")]
struct Cli {
    /// Delete the database on exit (dev mode, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Spawns a background task that periodically purges expired webhook dedup
/// markers and elapsed rate-limit windows.
fn spawn_maintenance_task(state: AppState) {
    let window_secs = state.rate_limiter.window_secs();
    tokio::spawn(async move {
        let interval = Duration::from_secs(5 * 60); // 5 minutes

        loop {
            tokio::time::sleep(interval).await;

            match state.db.get() {
                Ok(conn) => {
                    match queries::purge_old_webhook_events(&conn, WEBHOOK_EVENT_TTL_SECS) {
                        Ok(count) if count > 0 => {
                            tracing::debug!("Purged {} expired webhook markers", count);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("Failed to purge webhook markers: {}", e);
                        }
                    }

                    let now = chrono::Utc::now().timestamp();
                    match queries::purge_expired_rate_windows(&conn, now, window_secs) {
                        Ok(count) if count > 0 => {
                            tracing::debug!("Purged {} expired rate windows", count);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("Failed to purge rate windows: {}", e);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to get db connection for maintenance: {}", e);
                }
            }
        }
    });

    tracing::info!("Background maintenance task started (runs every 5 minutes)");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "magicroom=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let state = AppState {
        db: db_pool,
        sessions: Arc::new(ClerkSessions::new(&config.clerk_jwks_url)),
        inference: Arc::new(ReplicateClient::new(
            &config.replicate_api_token,
            &config.replicate_model_version,
        )),
        storage: Arc::new(StorageClient::new(
            &config.storage_url,
            &config.storage_service_key,
        )),
        stripe: StripeClient::new(&StripeConfig {
            secret_key: config.stripe_secret_key.clone(),
            webhook_secret: config.stripe_webhook_secret.clone(),
        }),
        clerk_webhook_secret: config.clerk_webhook_secret.clone(),
        replicate_webhook_secret: config.replicate_webhook_secret.clone(),
        base_url: config.base_url.clone(),
        upload_bucket: config.storage_bucket.clone(),
        rate_limiter: RateLimiter::new(config.rate_limit_max, config.rate_limit_window_secs),
        signup_bonus_credits: config.signup_bonus_credits,
    };

    spawn_maintenance_task(state.clone());

    let app = Router::new()
        // JSON API (session auth per-handler)
        .merge(handlers::api::router())
        // Webhook endpoints (provider-specific signature auth)
        .merge(handlers::webhooks::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral;
    let db_path = config.database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("Magic Room server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
