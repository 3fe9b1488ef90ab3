pub mod clerk;
pub mod common;
pub mod replicate;
pub mod stripe;

pub use clerk::handle_clerk_webhook;
pub use replicate::handle_replicate_webhook;
pub use stripe::handle_stripe_webhook;

use axum::{routing::post, Router};

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/webhooks/clerk", post(handle_clerk_webhook))
        .route("/api/webhooks/replicate", post(handle_replicate_webhook))
        .route("/api/webhooks/stripe", post(handle_stripe_webhook))
}
