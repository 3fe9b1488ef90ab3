use serde::{Deserialize, Serialize};

/// A Magic Room account, linked to the identity provider via
/// `clerk_user_id`. The `credits` balance is the authoritative count of
/// remaining generations; it never goes below zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub clerk_user_id: String,
    pub email: String,
    pub credits: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Data required to create a user record.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUser {
    pub clerk_user_id: String,
    pub email: String,
}
