mod from_row;
pub mod queries;
mod schema;

pub use from_row::FromRow;
pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::providers::{InferenceProvider, ObjectStorage, SessionVerifier, StripeClient};
use crate::rate_limit::RateLimiter;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state holding the database pool and the provider clients,
/// constructed once at startup and injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Session-token verification against the identity provider.
    pub sessions: Arc<dyn SessionVerifier>,
    /// Image generation provider.
    pub inference: Arc<dyn InferenceProvider>,
    /// Object storage for source photos and user uploads.
    pub storage: Arc<dyn ObjectStorage>,
    /// Payment provider client (checkout + webhook signatures).
    pub stripe: StripeClient,
    /// Identity-provider webhook signing secret (Svix scheme).
    pub clerk_webhook_secret: String,
    /// Inference-provider webhook signing secret (HMAC-SHA256 hex).
    pub replicate_webhook_secret: String,
    /// Public base URL of this service (webhook callbacks, checkout redirects).
    pub base_url: String,
    /// Default storage bucket for room photos.
    pub upload_bucket: String,
    pub rate_limiter: RateLimiter,
    /// Credits granted on first sign-up (0 disables the bonus).
    pub signup_bonus_credits: i64,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    Pool::builder().max_size(10).build(manager)
}
