use serde::{Deserialize, Serialize};

/// Immutable credit ledger entry.
///
/// `amount` is signed: positive for purchase/bonus/refund, negative for
/// usage. The sum of a user's transactions reconciles with their balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub kind: TransactionKind,
    pub amount: i64,
    /// Provider-side reference (Stripe payment intent / checkout session id).
    pub external_ref: Option<String>,
    /// Flexible metadata (JSON). For usage/refund rows: {"generation_id": ...};
    /// for purchases: {"package_id": ..., "credits": ...}
    pub metadata: Option<String>,
    pub created_at: i64,
}

/// Data required to append a ledger entry.
#[derive(Debug, Clone)]
pub struct CreateTransaction {
    pub user_id: String,
    pub kind: TransactionKind,
    pub amount: i64,
    pub external_ref: Option<String>,
    pub metadata: Option<String>,
}

/// Type of credit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Purchase,
    Usage,
    Bonus,
    Refund,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Usage => "usage",
            Self::Bonus => "bonus",
            Self::Refund => "refund",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "purchase" => Some(Self::Purchase),
            "usage" => Some(Self::Usage),
            "bonus" => Some(Self::Bonus),
            "refund" => Some(Self::Refund),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
