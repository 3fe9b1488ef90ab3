use rusqlite::Connection;

/// Initialize the database schema.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Users (identity-provider-linked accounts)
        -- credits is the authoritative balance; the CHECK is a backstop,
        -- the conditional-decrement query is the real guard.
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            clerk_user_id TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL,
            credits INTEGER NOT NULL DEFAULT 0 CHECK (credits >= 0),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_users_clerk ON users(clerk_user_id);

        -- Credit ledger (append-only)
        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            kind TEXT NOT NULL CHECK (kind IN ('purchase', 'usage', 'bonus', 'refund')),
            amount INTEGER NOT NULL,
            external_ref TEXT,
            metadata TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_transactions_user_time ON transactions(user_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_transactions_kind ON transactions(user_id, kind);

        -- Generations (one row per generation request)
        -- prediction_id is the inference provider's id; webhooks resolve
        -- through it since the provider echoes its own id back.
        CREATE TABLE IF NOT EXISTS generations (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            prediction_id TEXT,
            status TEXT NOT NULL CHECK (status IN ('starting', 'processing', 'succeeded', 'failed', 'canceled')),
            output_urls TEXT NOT NULL DEFAULT '[]',
            error TEXT,
            source_image_path TEXT,
            cost INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            completed_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_generations_user_time ON generations(user_id, created_at DESC);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_generations_prediction ON generations(prediction_id) WHERE prediction_id IS NOT NULL;

        -- Webhook dedup markers (24h TTL, purged by the maintenance task)
        CREATE TABLE IF NOT EXISTS webhook_events (
            id TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            event_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(provider, event_id)
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_events_lookup ON webhook_events(provider, event_id);
        CREATE INDEX IF NOT EXISTS idx_webhook_events_purge ON webhook_events(created_at);

        -- Rate-limit windows (fixed window per user, expired rows purged
        -- by the maintenance task)
        CREATE TABLE IF NOT EXISTS rate_limits (
            key TEXT PRIMARY KEY,
            window_start INTEGER NOT NULL,
            count INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}
