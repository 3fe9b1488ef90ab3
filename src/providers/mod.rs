//! External provider clients and the seams they plug into.
//!
//! Handlers depend on the traits here, not on concrete clients; production
//! wiring happens once at startup and tests inject stubs.

pub mod clerk;
pub mod replicate;
pub mod storage;
pub mod stripe;

pub use clerk::ClerkSessions;
pub use replicate::ReplicateClient;
pub use storage::StorageClient;
pub use stripe::{StripeClient, StripeConfig};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::GenerationStatus;

/// Verified identity extracted from a session token.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    /// The identity provider's user id (Clerk `user_...`).
    pub external_id: String,
    /// Email claim, when the session token template carries one.
    pub email: Option<String>,
}

/// Session-token verification against the identity provider.
#[async_trait]
pub trait SessionVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<SessionIdentity>;
}

/// A generation request sent to the inference provider.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Publicly fetchable URL of the source room photo.
    pub image_url: String,
    pub prompt: String,
    /// Completion callback endpoint, when webhook delivery is configured.
    pub webhook_url: Option<String>,
}

/// Snapshot of a prediction as reported by the inference provider.
#[derive(Debug, Clone)]
pub struct Prediction {
    /// The provider's own prediction id.
    pub id: String,
    pub status: GenerationStatus,
    pub output_urls: Vec<String>,
    pub error: Option<String>,
}

/// Image generation provider.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Start a prediction. May return a terminal result (the provider
    /// finished within the synchronous wait budget) or a non-terminal one
    /// that will complete via webhook/polling.
    async fn generate(&self, request: &InferenceRequest) -> Result<Prediction>;

    /// Fetch the current state of a prediction by the provider's id.
    async fn get_prediction(&self, id: &str) -> Result<Prediction>;
}

/// Object storage for source photos and user uploads.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store a file and return its public URL.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String>;

    /// Delete a stored file.
    async fn delete(&self, bucket: &str, path: &str) -> Result<()>;

    /// Public URL of a stored file.
    fn public_url(&self, bucket: &str, path: &str) -> String;
}
