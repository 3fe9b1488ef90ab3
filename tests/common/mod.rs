//! Test utilities and fixtures for Magic Room integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};

pub use magicroom::billing;
pub use magicroom::db::{init_db, queries, AppState, DbPool};
pub use magicroom::error::{AppError, Result};
pub use magicroom::models::*;
pub use magicroom::providers::{
    InferenceProvider, InferenceRequest, ObjectStorage, Prediction, SessionIdentity,
    SessionVerifier, StripeClient, StripeConfig,
};
pub use magicroom::rate_limit::RateLimiter;

/// Create an in-memory test database with schema initialized.
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

/// Create a pooled in-memory database (shared-cache URI so every pooled
/// connection sees the same data).
pub fn setup_test_pool() -> DbPool {
    let uri = format!(
        "file:memdb_{}?mode=memory&cache=shared",
        uuid::Uuid::new_v4().as_simple()
    );
    let manager = SqliteConnectionManager::file(uri).with_flags(
        OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE,
    );
    let pool = Pool::builder().max_size(2).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }
    pool
}

/// Session identity fixture.
pub fn identity(external_id: &str) -> SessionIdentity {
    SessionIdentity {
        external_id: external_id.to_string(),
        email: Some(format!("{}@example.com", external_id)),
    }
}

/// Create a test user with a given credit balance.
pub fn create_test_user(conn: &Connection, clerk_user_id: &str, credits: i64) -> User {
    let (user, _) = queries::get_or_create_user(
        conn,
        &CreateUser {
            clerk_user_id: clerk_user_id.to_string(),
            email: format!("{}@example.com", clerk_user_id),
        },
    )
    .expect("Failed to create test user");

    if credits > 0 {
        conn.execute(
            "UPDATE users SET credits = ?1 WHERE id = ?2",
            rusqlite::params![credits, &user.id],
        )
        .expect("Failed to set test balance");
    }

    queries::get_user_by_id(conn, &user.id)
        .expect("Failed to reload test user")
        .expect("Test user should exist")
}

/// Session verifier stub that accepts every token as a fixed identity.
pub struct StaticSessions {
    pub identity: SessionIdentity,
}

#[async_trait]
impl SessionVerifier for StaticSessions {
    async fn verify(&self, _token: &str) -> Result<SessionIdentity> {
        Ok(self.identity.clone())
    }
}

/// Programmable inference provider responses.
#[derive(Debug, Clone)]
pub enum StubResponse {
    /// Terminal success with the given output URLs.
    Succeed(Vec<String>),
    /// Terminal failure with a provider error message.
    Fail(String),
    /// Transport-level error (the call itself fails).
    Error(String),
    /// Provider accepted the job but has not finished.
    Processing,
}

/// Inference provider stub. Responses are consumed in order; when the
/// queue is empty the default response is served. Each `generate` call
/// mints a fresh prediction id ("pred_test_0", "pred_test_1", ...) since
/// prediction ids are unique per generation.
pub struct StubInference {
    pub prediction_id: String,
    pub responses: Mutex<VecDeque<StubResponse>>,
    pub default: StubResponse,
    pub calls: AtomicUsize,
    pub generated: AtomicUsize,
}

impl StubInference {
    pub fn new(default: StubResponse) -> Self {
        Self {
            prediction_id: "pred_test".to_string(),
            responses: Mutex::new(VecDeque::new()),
            default,
            calls: AtomicUsize::new(0),
            generated: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, response: StubResponse) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self, id: &str) -> Result<Prediction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());
        match response {
            StubResponse::Succeed(urls) => Ok(Prediction {
                id: id.to_string(),
                status: GenerationStatus::Succeeded,
                output_urls: urls,
                error: None,
            }),
            StubResponse::Fail(message) => Ok(Prediction {
                id: id.to_string(),
                status: GenerationStatus::Failed,
                output_urls: Vec::new(),
                error: Some(message),
            }),
            StubResponse::Error(message) => Err(AppError::Internal(message)),
            StubResponse::Processing => Ok(Prediction {
                id: id.to_string(),
                status: GenerationStatus::Processing,
                output_urls: Vec::new(),
                error: None,
            }),
        }
    }
}

#[async_trait]
impl InferenceProvider for StubInference {
    async fn generate(&self, _request: &InferenceRequest) -> Result<Prediction> {
        let n = self.generated.fetch_add(1, Ordering::SeqCst);
        self.next(&format!("{}_{}", self.prediction_id, n))
    }

    async fn get_prediction(&self, id: &str) -> Result<Prediction> {
        self.next(id)
    }
}

/// Object storage stub recording uploads and deletes.
#[derive(Default)]
pub struct StubStorage {
    pub uploads: Mutex<Vec<String>>,
    pub deletes: Mutex<Vec<String>>,
    pub fail_uploads: AtomicBool,
    pub fail_deletes: AtomicBool,
}

#[async_trait]
impl ObjectStorage for StubStorage {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        _content_type: &str,
        _bytes: Vec<u8>,
    ) -> Result<String> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(AppError::Storage("stub upload failure".to_string()));
        }
        self.uploads.lock().unwrap().push(path.to_string());
        Ok(self.public_url(bucket, path))
    }

    async fn delete(&self, _bucket: &str, path: &str) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(AppError::Storage("stub delete failure".to_string()));
        }
        self.deletes.lock().unwrap().push(path.to_string());
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("https://storage.test/{}/{}", bucket, path)
    }
}

/// Full application state wired with stub providers.
pub struct TestContext {
    pub state: AppState,
    pub inference: Arc<StubInference>,
    pub storage: Arc<StubStorage>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_rate_limit(100, 60)
    }

    pub fn with_rate_limit(max: u32, window_secs: i64) -> Self {
        let inference = Arc::new(StubInference::new(StubResponse::Succeed(vec![
            "https://cdn.test/output.png".to_string(),
        ])));
        let storage = Arc::new(StubStorage::default());

        let state = AppState {
            db: setup_test_pool(),
            sessions: Arc::new(StaticSessions {
                identity: identity("user_session"),
            }),
            inference: inference.clone(),
            storage: storage.clone(),
            stripe: StripeClient::new(&StripeConfig {
                secret_key: "sk_test_xxx".to_string(),
                webhook_secret: "whsec_test_secret".to_string(),
            }),
            clerk_webhook_secret: "whsec_dGVzdHNlY3JldA==".to_string(),
            replicate_webhook_secret: "replicate_test_secret".to_string(),
            base_url: "http://localhost:3000".to_string(),
            upload_bucket: "room-images".to_string(),
            rate_limiter: RateLimiter::new(max, window_secs),
            // Keep balances predictable; bonus behavior is tested through
            // the identity webhook directly.
            signup_bonus_credits: 0,
        };

        Self {
            state,
            inference,
            storage,
        }
    }
}

/// Sum of a user's ledger amounts; should reconcile with the balance.
pub fn ledger_sum(conn: &Connection, user_id: &str) -> i64 {
    queries::list_transactions_for_user(conn, user_id)
        .expect("Failed to list transactions")
        .iter()
        .map(|t| t.amount)
        .sum()
}

/// Transactions of one kind for a user.
pub fn transactions_of_kind(
    conn: &Connection,
    user_id: &str,
    kind: TransactionKind,
) -> Vec<Transaction> {
    queries::list_transactions_for_user(conn, user_id)
        .expect("Failed to list transactions")
        .into_iter()
        .filter(|t| t.kind == kind)
        .collect()
}
