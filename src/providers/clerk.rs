//! Identity provider integration: session-token verification (RS256 via
//! the instance JWKS) and webhook signature verification (Svix scheme).

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use jwt_simple::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{msg, AppError, Result};

use super::{SessionIdentity, SessionVerifier};

type HmacSha256 = Hmac<Sha256>;

/// Cache duration for JWKS keys (1 hour)
const JWKS_CACHE_DURATION: Duration = Duration::from_secs(3600);

/// Maximum webhook timestamp skew in either direction (5 minutes).
const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

struct CachedJwks {
    keys: HashMap<String, RS256PublicKey>,
    fetched_at: Instant,
}

impl CachedJwks {
    fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() > JWKS_CACHE_DURATION
    }
}

/// Session verifier backed by the identity provider's JWKS endpoint.
///
/// Session tokens are RS256 JWTs; the signing keys are fetched once and
/// cached for an hour. `sub` carries the provider's user id; an `email`
/// claim is read when the instance's session token template includes one.
pub struct ClerkSessions {
    jwks_url: String,
    cache: RwLock<Option<CachedJwks>>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    kid: Option<String>,
    alg: Option<String>,
    #[serde(default)]
    n: String,
    #[serde(default)]
    e: String,
}

/// Custom claims read from a session token.
#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    #[serde(default)]
    email: Option<String>,
}

impl ClerkSessions {
    pub fn new(jwks_url: &str) -> Self {
        Self {
            jwks_url: jwks_url.to_string(),
            cache: RwLock::new(None),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    async fn get_key(&self, kid: &str) -> Result<RS256PublicKey> {
        {
            let cache = self.cache.read().unwrap();
            if let Some(cached) = cache.as_ref() {
                if !cached.is_stale() {
                    return cached.keys.get(kid).cloned().ok_or_else(|| {
                        AppError::SessionInvalid(format!("Key ID '{}' not found in JWKS", kid))
                    });
                }
            }
        }

        let keys = self.fetch_jwks().await?;
        let key = keys.get(kid).cloned().ok_or_else(|| {
            AppError::SessionInvalid(format!("Key ID '{}' not found in JWKS", kid))
        });

        let mut cache = self.cache.write().unwrap();
        *cache = Some(CachedJwks {
            keys,
            fetched_at: Instant::now(),
        });

        key
    }

    async fn fetch_jwks(&self) -> Result<HashMap<String, RS256PublicKey>> {
        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("JWKS fetch failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        let jwks: JwksResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse JWKS JSON: {}", e)))?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            if jwk.kty != "RSA" {
                continue;
            }
            if let Some(ref alg) = jwk.alg {
                if alg != "RS256" {
                    continue;
                }
            }
            let Some(kid) = jwk.kid else { continue };

            match parse_rsa_public_key(&jwk.n, &jwk.e) {
                Ok(key) => {
                    keys.insert(kid, key);
                }
                Err(e) => {
                    tracing::warn!("Skipping unparseable JWK '{}': {}", kid, e);
                }
            }
        }

        if keys.is_empty() {
            return Err(AppError::Internal(
                "No valid RS256 keys found in JWKS".to_string(),
            ));
        }

        Ok(keys)
    }
}

#[async_trait]
impl SessionVerifier for ClerkSessions {
    async fn verify(&self, token: &str) -> Result<SessionIdentity> {
        let metadata = Token::decode_metadata(token)
            .map_err(|e| AppError::SessionInvalid(format!("Invalid token format: {}", e)))?;

        let kid = metadata
            .key_id()
            .ok_or_else(|| AppError::SessionInvalid("Missing key id".to_string()))?
            .to_string();

        let key = self.get_key(&kid).await?;

        let claims = key
            .verify_token::<SessionClaims>(token, Some(VerificationOptions::default()))
            .map_err(|e| AppError::SessionInvalid(format!("Token verification failed: {}", e)))?;

        let external_id = claims
            .subject
            .ok_or_else(|| AppError::SessionInvalid("Missing 'sub' claim".to_string()))?;

        Ok(SessionIdentity {
            external_id,
            email: claims.custom.email,
        })
    }
}

/// Parse an RSA public key from base64url-encoded n and e components.
fn parse_rsa_public_key(n_b64: &str, e_b64: &str) -> Result<RS256PublicKey> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    let n = URL_SAFE_NO_PAD
        .decode(n_b64)
        .map_err(|e| AppError::Internal(format!("Invalid base64url for 'n': {}", e)))?;
    let e = URL_SAFE_NO_PAD
        .decode(e_b64)
        .map_err(|e| AppError::Internal(format!("Invalid base64url for 'e': {}", e)))?;

    RS256PublicKey::from_components(&n, &e)
        .map_err(|e| AppError::Internal(format!("Failed to parse RSA key: {}", e)))
}

/// Verify an identity-provider webhook signature (Svix scheme).
///
/// The signed content is `{msg_id}.{timestamp}.{body}`, MACed with the
/// base64-decoded portion of the `whsec_`-prefixed secret. The signature
/// header may carry several space-separated `v1,<base64>` candidates (key
/// rotation); any constant-time match accepts.
pub fn verify_webhook_signature(
    secret: &str,
    msg_id: &str,
    timestamp: &str,
    payload: &[u8],
    signature_header: &str,
) -> Result<bool> {
    let ts: i64 = timestamp
        .parse()
        .map_err(|_| AppError::BadRequest(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

    let age = chrono::Utc::now().timestamp() - ts;
    if age > WEBHOOK_TIMESTAMP_TOLERANCE_SECS || age < -WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
        tracing::warn!("Identity webhook rejected: timestamp out of tolerance (age={}s)", age);
        return Ok(false);
    }

    let key = BASE64
        .decode(secret.strip_prefix("whsec_").unwrap_or(secret))
        .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;

    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
    mac.update(msg_id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = BASE64.encode(mac.finalize().into_bytes());

    for candidate in signature_header.split(' ') {
        let Some(sig) = candidate.strip_prefix("v1,") else {
            continue;
        };
        if sig.len() == expected.len() && bool::from(expected.as_bytes().ct_eq(sig.as_bytes())) {
            return Ok(true);
        }
    }

    Ok(false)
}
