//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to
/// rusqlite errors instead of panicking on corrupt data.
fn parse_enum<T>(
    row: &Row,
    col: usize,
    col_name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(col)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const USER_COLS: &str = "id, clerk_user_id, email, credits, created_at, updated_at";

pub const TRANSACTION_COLS: &str =
    "id, user_id, kind, amount, external_ref, metadata, created_at";

pub const GENERATION_COLS: &str = "id, user_id, prediction_id, status, output_urls, error, source_image_path, cost, created_at, completed_at";

// ============ FromRow Implementations ============

impl FromRow for User {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            clerk_user_id: row.get(1)?,
            email: row.get(2)?,
            credits: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

impl FromRow for Transaction {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Transaction {
            id: row.get(0)?,
            user_id: row.get(1)?,
            kind: parse_enum(row, 2, "kind", TransactionKind::from_str)?,
            amount: row.get(3)?,
            external_ref: row.get(4)?,
            metadata: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for Generation {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        // output_urls is stored as a JSON array; corrupt JSON maps to a
        // column type error rather than a panic.
        let raw_urls: String = row.get(4)?;
        let output_urls: Vec<String> = serde_json::from_str(&raw_urls).map_err(|_| {
            rusqlite::Error::InvalidColumnType(
                4,
                "output_urls".to_string(),
                rusqlite::types::Type::Text,
            )
        })?;
        Ok(Generation {
            id: row.get(0)?,
            user_id: row.get(1)?,
            prediction_id: row.get(2)?,
            status: parse_enum(row, 3, "status", GenerationStatus::from_str)?,
            output_urls,
            error: row.get(5)?,
            source_image_path: row.get(6)?,
            cost: row.get(7)?,
            created_at: row.get(8)?,
            completed_at: row.get(9)?,
        })
    }
}
