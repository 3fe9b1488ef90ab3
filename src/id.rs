//! Prefixed ID generation for Magic Room entities.
//!
//! All IDs use an `mr_` brand prefix to guarantee collision avoidance with
//! provider-issued IDs (Stripe's `cs_`/`pi_`, Replicate prediction ids,
//! Clerk's `user_`).
//!
//! Format: `mr_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

/// All known entity prefixes for validation.
const ALL_PREFIXES: &[&str] = &["mr_usr_", "mr_txn_", "mr_gen_"];

/// Validate that a string is a valid Magic Room prefixed ID.
///
/// Cheap format check to reject garbage before hitting the database.
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];
    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// Entity types that have prefixed IDs.
#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    User,
    Transaction,
    Generation,
}

impl EntityType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::User => "mr_usr",
            Self::Transaction => "mr_txn",
            Self::Generation => "mr_gen",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
