use chrono::Utc;
use rusqlite::{params, Connection};

use crate::error::{AppError, Result};
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    query_all, query_one, GENERATION_COLS, TRANSACTION_COLS, USER_COLS,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Users ============

/// Resolve the user for an identity, creating the record on first sight.
///
/// Idempotent: concurrent calls and replayed identity-provider events both
/// land on the same row thanks to the UNIQUE constraint on clerk_user_id.
/// Returns the user and whether this call created it.
pub fn get_or_create_user(conn: &Connection, input: &CreateUser) -> Result<(User, bool)> {
    let id = EntityType::User.gen_id();
    let now = now();
    let email = input.email.trim().to_lowercase();

    let inserted = conn.execute(
        "INSERT INTO users (id, clerk_user_id, email, credits, created_at, updated_at)
         VALUES (?1, ?2, ?3, 0, ?4, ?4)
         ON CONFLICT(clerk_user_id) DO NOTHING",
        params![&id, &input.clerk_user_id, &email, now],
    )?;

    let user = get_user_by_clerk_id(conn, &input.clerk_user_id)?.ok_or_else(|| {
        AppError::Internal(format!(
            "User row missing after upsert for {}",
            input.clerk_user_id
        ))
    })?;

    Ok((user, inserted > 0))
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLS),
        &[&id],
    )
}

pub fn get_user_by_clerk_id(conn: &Connection, clerk_user_id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE clerk_user_id = ?1", USER_COLS),
        &[&clerk_user_id],
    )
}

// ============ Credit ledger ============

/// Atomically deduct `amount` credits if and only if the balance covers it.
///
/// Single conditional UPDATE at the storage layer: two concurrent deducts
/// can never both succeed against one balance (the double-spend race from
/// a read-then-write pattern is structurally impossible here).
pub fn deduct_credits(conn: &Connection, user_id: &str, amount: i64) -> Result<bool> {
    if amount <= 0 {
        return Err(AppError::Internal(format!(
            "Refusing non-positive deduction: {}",
            amount
        )));
    }
    let affected = conn.execute(
        "UPDATE users SET credits = credits - ?1, updated_at = ?2
         WHERE id = ?3 AND credits >= ?1",
        params![amount, now(), user_id],
    )?;
    Ok(affected > 0)
}

/// Unconditionally add credits (purchases, bonuses, refunds).
pub fn credit_user(conn: &Connection, user_id: &str, amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(AppError::Internal(format!(
            "Refusing non-positive credit: {}",
            amount
        )));
    }
    let affected = conn.execute(
        "UPDATE users SET credits = credits + ?1, updated_at = ?2 WHERE id = ?3",
        params![amount, now(), user_id],
    )?;
    if affected == 0 {
        return Err(AppError::NotFound(format!("User not found: {}", user_id)));
    }
    Ok(())
}

/// Append an immutable ledger row.
pub fn create_transaction(conn: &Connection, input: &CreateTransaction) -> Result<Transaction> {
    let id = EntityType::Transaction.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO transactions (id, user_id, kind, amount, external_ref, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &id,
            &input.user_id,
            input.kind.as_str(),
            input.amount,
            &input.external_ref,
            &input.metadata,
            now
        ],
    )?;

    Ok(Transaction {
        id,
        user_id: input.user_id.clone(),
        kind: input.kind,
        amount: input.amount,
        external_ref: input.external_ref.clone(),
        metadata: input.metadata.clone(),
        created_at: now,
    })
}

pub fn list_transactions_for_user(conn: &Connection, user_id: &str) -> Result<Vec<Transaction>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM transactions WHERE user_id = ?1 ORDER BY created_at DESC, id",
            TRANSACTION_COLS
        ),
        &[&user_id],
    )
}

// ============ Generations ============

/// Create a generation record under a caller-minted id. The orchestrator
/// mints the id up front so the usage ledger row can reference it before
/// the record exists.
pub fn create_generation(
    conn: &Connection,
    id: &str,
    input: &CreateGeneration,
) -> Result<Generation> {
    let now = now();

    conn.execute(
        "INSERT INTO generations (id, user_id, status, output_urls, source_image_path, cost, created_at)
         VALUES (?1, ?2, ?3, '[]', ?4, ?5, ?6)",
        params![
            id,
            &input.user_id,
            GenerationStatus::Starting.as_str(),
            &input.source_image_path,
            input.cost,
            now
        ],
    )?;

    Ok(Generation {
        id: id.to_string(),
        user_id: input.user_id.clone(),
        prediction_id: None,
        status: GenerationStatus::Starting,
        output_urls: Vec::new(),
        error: None,
        source_image_path: input.source_image_path.clone(),
        cost: input.cost,
        created_at: now,
        completed_at: None,
    })
}

pub fn get_generation_by_id(conn: &Connection, id: &str) -> Result<Option<Generation>> {
    query_one(
        conn,
        &format!("SELECT {} FROM generations WHERE id = ?1", GENERATION_COLS),
        &[&id],
    )
}

/// Owner-scoped lookup for the status endpoint.
pub fn get_generation_for_user(
    conn: &Connection,
    id: &str,
    user_id: &str,
) -> Result<Option<Generation>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM generations WHERE id = ?1 AND user_id = ?2",
            GENERATION_COLS
        ),
        &[&id, &user_id],
    )
}

pub fn get_generation_by_prediction_id(
    conn: &Connection,
    prediction_id: &str,
) -> Result<Option<Generation>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM generations WHERE prediction_id = ?1",
            GENERATION_COLS
        ),
        &[&prediction_id],
    )
}

/// Record the provider's prediction id once the inference call returns.
pub fn set_generation_prediction(conn: &Connection, id: &str, prediction_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE generations SET prediction_id = ?1 WHERE id = ?2",
        params![prediction_id, id],
    )?;
    Ok(())
}

/// Advance a non-terminal generation to another non-terminal status.
/// No-op if the row already reached a terminal state.
pub fn update_generation_progress(
    conn: &Connection,
    id: &str,
    status: GenerationStatus,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE generations SET status = ?1
         WHERE id = ?2 AND status IN ('starting', 'processing')",
        params![status.as_str(), id],
    )?;
    Ok(affected > 0)
}

/// Transition a generation to a terminal state, exactly once.
///
/// The WHERE clause only matches non-terminal rows, so concurrent
/// completions (webhook vs. poll) race safely: exactly one caller observes
/// `true` and owns the follow-up side effects (refund, cleanup).
pub fn try_complete_generation(
    conn: &Connection,
    id: &str,
    status: GenerationStatus,
    output_urls: &[String],
    error: Option<&str>,
) -> Result<bool> {
    debug_assert!(status.is_terminal());
    let urls_json = serde_json::to_string(output_urls)?;
    let affected = conn.execute(
        "UPDATE generations SET status = ?1, output_urls = ?2, error = ?3, completed_at = ?4
         WHERE id = ?5 AND status IN ('starting', 'processing')",
        params![status.as_str(), &urls_json, error, now(), id],
    )?;
    Ok(affected > 0)
}

// ============ Webhook dedup markers ============

/// Atomically claim a webhook event marker. Returns true if this is the
/// first time the event is seen. Call inside the same transaction as the
/// event's mutation so a failed mutation releases the claim for retries.
pub fn try_record_webhook_event(conn: &Connection, provider: &str, event_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "INSERT INTO webhook_events (id, provider, event_id, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(provider, event_id) DO NOTHING",
        params![
            uuid::Uuid::new_v4().to_string(),
            provider,
            event_id,
            now()
        ],
    )?;
    Ok(affected > 0)
}

/// Remove dedup markers past their TTL.
pub fn purge_old_webhook_events(conn: &Connection, ttl_secs: i64) -> Result<usize> {
    let affected = conn.execute(
        "DELETE FROM webhook_events WHERE created_at < ?1",
        params![now() - ttl_secs],
    )?;
    Ok(affected)
}

// ============ Rate-limit windows ============

/// Record a hit against a fixed rate-limit window, opening a new window if
/// the current one has expired. Returns (window_start, count) after the
/// hit. Single UPSERT so concurrent hits serialize at the storage layer.
pub fn hit_rate_window(
    conn: &Connection,
    key: &str,
    now: i64,
    window_secs: i64,
) -> Result<(i64, i64)> {
    let row = conn.query_row(
        "INSERT INTO rate_limits (key, window_start, count) VALUES (?1, ?2, 1)
         ON CONFLICT(key) DO UPDATE SET
             count = CASE
                 WHEN rate_limits.window_start + ?3 <= excluded.window_start THEN 1
                 ELSE rate_limits.count + 1
             END,
             window_start = CASE
                 WHEN rate_limits.window_start + ?3 <= excluded.window_start THEN excluded.window_start
                 ELSE rate_limits.window_start
             END
         RETURNING window_start, count",
        params![key, now, window_secs],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(row)
}

/// Remove rate-limit windows that have fully elapsed.
pub fn purge_expired_rate_windows(conn: &Connection, now: i64, window_secs: i64) -> Result<usize> {
    let affected = conn.execute(
        "DELETE FROM rate_limits WHERE window_start + ?1 <= ?2",
        params![window_secs, now],
    )?;
    Ok(affected)
}
