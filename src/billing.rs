//! Money-path operations over the credit ledger.
//!
//! Every function here runs its balance mutation and its ledger row in one
//! database transaction, so a crash mid-operation never leaves a mutation
//! without its ledger entry. The deduct-then-refund pair around an external
//! inference call is intentionally NOT one transaction: the external call
//! cannot participate, so the refund is a compensating action (see
//! [`settle_failed_generation`]).

use rusqlite::Connection;

use crate::db::queries;
use crate::error::Result;
use crate::models::{CreateTransaction, Generation, GenerationStatus, TransactionKind};

/// Outcome of an idempotent settlement operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// This call performed the mutation.
    Applied,
    /// The dedup marker for this webhook event already existed.
    AlreadyProcessed,
    /// The generation already reached a terminal state; nothing to do.
    AlreadySettled,
}

/// Deduct `cost` credits and record the `usage` ledger row for a new
/// generation. Returns false (and mutates nothing) when the balance does
/// not cover the cost.
pub fn charge_generation(
    conn: &mut Connection,
    user_id: &str,
    cost: i64,
    generation_id: &str,
) -> Result<bool> {
    let tx = conn.transaction()?;

    if !queries::deduct_credits(&tx, user_id, cost)? {
        // Rolls back on drop; no usage row is recorded for a failed deduct.
        return Ok(false);
    }

    queries::create_transaction(
        &tx,
        &CreateTransaction {
            user_id: user_id.to_string(),
            kind: TransactionKind::Usage,
            amount: -cost,
            external_ref: None,
            metadata: Some(
                serde_json::json!({ "generation_id": generation_id }).to_string(),
            ),
        },
    )?;

    tx.commit()?;
    Ok(true)
}

/// Settle a generation that failed (or was canceled) after its credits were
/// deducted: transition the record to the terminal state, credit the full
/// cost back, and record the `refund` ledger row.
///
/// Exactly-once: the terminal transition is a conditional UPDATE that only
/// fires on non-terminal rows, and when `dedup_event` is given the webhook
/// marker is claimed inside the same transaction. Replayed webhooks and
/// webhook/poll races therefore refund a single time.
pub fn settle_failed_generation(
    conn: &mut Connection,
    generation: &Generation,
    status: GenerationStatus,
    error: Option<&str>,
    dedup_event: Option<(&str, &str)>,
) -> Result<SettleOutcome> {
    let tx = conn.transaction()?;

    if let Some((provider, event_id)) = dedup_event {
        if !queries::try_record_webhook_event(&tx, provider, event_id)? {
            return Ok(SettleOutcome::AlreadyProcessed);
        }
    }

    if !queries::try_complete_generation(&tx, &generation.id, status, &[], error)? {
        // Another path already settled this generation. Commit so the dedup
        // marker (if any) sticks and the provider's retries stay quiet.
        tx.commit()?;
        return Ok(SettleOutcome::AlreadySettled);
    }

    queries::credit_user(&tx, &generation.user_id, generation.cost)?;
    queries::create_transaction(
        &tx,
        &CreateTransaction {
            user_id: generation.user_id.clone(),
            kind: TransactionKind::Refund,
            amount: generation.cost,
            external_ref: None,
            metadata: Some(
                serde_json::json!({ "generation_id": generation.id }).to_string(),
            ),
        },
    )?;

    tx.commit()?;

    tracing::info!(
        "Refunded {} credit(s) to {} for failed generation {}",
        generation.cost,
        generation.user_id,
        generation.id
    );

    Ok(SettleOutcome::Applied)
}

/// Credit a purchased package and record the `purchase` ledger row,
/// claiming the payment webhook's dedup marker in the same transaction so
/// replayed deliveries credit exactly once.
pub fn grant_purchase(
    conn: &mut Connection,
    user_id: &str,
    package_id: &str,
    credits: i64,
    external_ref: &str,
    dedup_event: (&str, &str),
) -> Result<SettleOutcome> {
    let tx = conn.transaction()?;

    let (provider, event_id) = dedup_event;
    if !queries::try_record_webhook_event(&tx, provider, event_id)? {
        return Ok(SettleOutcome::AlreadyProcessed);
    }

    queries::credit_user(&tx, user_id, credits)?;
    queries::create_transaction(
        &tx,
        &CreateTransaction {
            user_id: user_id.to_string(),
            kind: TransactionKind::Purchase,
            amount: credits,
            external_ref: Some(external_ref.to_string()),
            metadata: Some(
                serde_json::json!({ "package_id": package_id, "credits": credits }).to_string(),
            ),
        },
    )?;

    tx.commit()?;
    Ok(SettleOutcome::Applied)
}

/// Grant the one-time sign-up bonus. Callers only invoke this when the user
/// row was freshly created, which keeps the bonus single-shot.
pub fn grant_signup_bonus(conn: &mut Connection, user_id: &str, credits: i64) -> Result<()> {
    if credits <= 0 {
        return Ok(());
    }

    let tx = conn.transaction()?;

    queries::credit_user(&tx, user_id, credits)?;
    queries::create_transaction(
        &tx,
        &CreateTransaction {
            user_id: user_id.to_string(),
            kind: TransactionKind::Bonus,
            amount: credits,
            external_ref: None,
            metadata: Some(serde_json::json!({ "reason": "signup" }).to_string()),
        },
    )?;

    tx.commit()?;
    Ok(())
}
