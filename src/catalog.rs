//! Static credit package catalog.
//!
//! Packages are compile-time constants, not user data. The checkout handler
//! resolves ids against this table and the payment webhook resolves them
//! again before crediting.

use serde::Serialize;

/// A purchasable credit package.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CreditPackage {
    pub id: &'static str,
    pub name: &'static str,
    pub credits: i64,
    /// Price in cents (USD).
    pub price_cents: i64,
    /// Pre-configured Stripe Price id, when one exists in the dashboard.
    /// Checkout falls back to inline price_data when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stripe_price_id: Option<&'static str>,
    pub active: bool,
}

pub const PACKAGES: &[CreditPackage] = &[
    CreditPackage {
        id: "starter",
        name: "Starter",
        credits: 30,
        price_cents: 999,
        stripe_price_id: None,
        active: true,
    },
    CreditPackage {
        id: "pro",
        name: "Pro",
        credits: 100,
        price_cents: 2499,
        stripe_price_id: None,
        active: true,
    },
    CreditPackage {
        id: "ultimate",
        name: "Ultimate",
        credits: 250,
        price_cents: 4999,
        stripe_price_id: None,
        active: true,
    },
];

/// Look up an active package by id.
pub fn find(id: &str) -> Option<&'static CreditPackage> {
    PACKAGES.iter().find(|p| p.id == id && p.active)
}
