//! Credential Broker (spec.md section 4.2): obtains and caches OAuth2
//! access tokens, verifies incoming JWTs against a JWKS endpoint.
//!
//! Grounded on `common_kafka`'s config-struct-plus-thin-client shape and on
//! `common-redis`'s cache-or-fetch pattern, generalized to the token cache
//! spec.md names. The shared retry-plus-breaker policy wrapping both
//! `fetch_token` and `verify_token` follows the decorator design note in
//! section 9 via `common_retry::with_retry`.

use std::sync::Arc;
use std::time::Duration;

use common_retry::{with_retry, CircuitBreaker, CircuitBreakerConfig, ErrorClass, RetryPolicy};
use common_store::OffsetStore;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::IdpConfig;
use crate::error::FederatorTokenError;
use crate::jwks::Jwks;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedToken {
    raw: String,
    expires_at: i64,
}

/// A verified, decoded bearer token (spec.md section 3's `JwtToken`).
#[derive(Debug, Clone)]
pub struct JwtToken {
    pub raw: String,
    pub token_type: &'static str,
    pub expires_at: i64,
    pub client_id: String,
    pub claims: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    exp: i64,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    aud: Option<AudienceClaim>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum AudienceClaim {
    One(String),
    Many(Vec<String>),
}

impl AudienceClaim {
    fn contains(&self, wanted: &[String]) -> bool {
        match self {
            AudienceClaim::One(a) => wanted.iter().any(|w| w == a),
            AudienceClaim::Many(list) => list.iter().any(|a| wanted.contains(a)),
        }
    }
}

pub struct CredentialBroker {
    config: IdpConfig,
    http: reqwest::Client,
    store: Arc<OffsetStore>,
    fetch_policy: RetryPolicy,
    fetch_breaker: CircuitBreaker,
    verify_breaker: CircuitBreaker,
}

impl CredentialBroker {
    pub fn new(config: IdpConfig, store: Arc<OffsetStore>, http: reqwest::Client) -> Self {
        let backoff = Duration::from_millis(config.idp_token_backoff_ms);
        Self {
            // spec.md 4.2: "retry once after a configured backoff" — one retry total.
            fetch_policy: RetryPolicy::new(2, backoff),
            fetch_breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            verify_breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            config,
            http,
            store,
        }
    }

    fn token_key(&self) -> String {
        OffsetStore::token_key(&self.config.management_node_id)
    }

    /// Returns a cached token if one is present and not within the expiry
    /// buffer window, otherwise fetches a fresh one via the configured flow.
    pub async fn get_token(&self) -> Result<String, FederatorTokenError> {
        if let Some(cached) = self.store.get_value::<CachedToken>(&self.token_key()).await? {
            if !self.is_expiring(cached.expires_at) {
                return Ok(cached.raw);
            }
        }
        self.fetch_and_cache().await
    }

    /// Evict the cached token (called on a 401 from a producer) and fetch once more.
    pub async fn refresh_after_401(&self) -> Result<String, FederatorTokenError> {
        self.store.delete(&self.token_key()).await?;
        self.fetch_and_cache().await
    }

    fn is_expiring(&self, expires_at: i64) -> bool {
        token_is_expiring(expires_at, self.config.idp_token_buffer_secs, now_epoch_secs())
    }

    async fn fetch_and_cache(&self) -> Result<String, FederatorTokenError> {
        let breaker = &self.fetch_breaker;
        let policy = &self.fetch_policy;
        let resp: TokenResponse = with_retry(policy, Some(breaker), || async {
            self.request_token().await.map_err(|e| (ErrorClass::Transient, e))
        })
        .await?;

        let expires_at = now_epoch_secs() + resp.expires_in;
        self.store
            .set_value(
                &self.token_key(),
                &CachedToken {
                    raw: resp.access_token.clone(),
                    expires_at,
                },
                Some(Duration::from_secs(resp.expires_in.max(1) as u64)),
            )
            .await?;
        info!(expires_in = resp.expires_in, "fetched fresh IDP access token");
        Ok(resp.access_token)
    }

    async fn request_token(&self) -> Result<TokenResponse, FederatorTokenError> {
        let mut form = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", self.config.idp_client_id.clone()),
        ];
        if !self.config.idp_mtls_enabled {
            if let Some(secret) = &self.config.idp_client_secret {
                form.push(("client_secret", secret.clone()));
            }
        }

        let response = self
            .http
            .post(&self.config.idp_token_url)
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FederatorTokenError::NonSuccessStatus(response.status().as_u16()));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(FederatorTokenError::Http)
    }

    /// Verifies an inbound bearer token's signature (RS256 against the
    /// configured JWKS), `exp`, and — when configured — `aud`. Resolves the
    /// caller's client id from `client_id` or `sub`.
    pub async fn verify_token(&self, token: &str) -> Result<JwtToken, FederatorTokenError> {
        let breaker = &self.verify_breaker;
        let jwks_url = self.config.idp_jwks_url.clone();
        let http = self.http.clone();
        let policy = RetryPolicy::new(3, Duration::from_millis(200));
        let jwks: Jwks = with_retry(&policy, Some(breaker), || {
            let http = http.clone();
            let jwks_url = jwks_url.clone();
            async move {
                let resp = http
                    .get(&jwks_url)
                    .send()
                    .await
                    .map_err(FederatorTokenError::Http)?;
                if !resp.status().is_success() {
                    return Err(FederatorTokenError::NonSuccessStatus(resp.status().as_u16()));
                }
                resp.json::<Jwks>().await.map_err(FederatorTokenError::Http)
            }
            .await
            .map_err(|e| (ErrorClass::Transient, e))
        })
        .await?;

        let header = decode_header(token)?;
        let decoding_key = jwks.find_decoding_key(header.kid.as_deref())?;

        let mut validation = Validation::new(Algorithm::RS256);
        let audiences = self.config.audiences();
        if audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&audiences);
        }

        let token_data = decode::<Claims>(token, &decoding_key, &validation)?;
        let claims = token_data.claims;

        if !audiences.is_empty() {
            let ok = claims.aud.as_ref().is_some_and(|a| a.contains(&audiences));
            if !ok {
                warn!("token audience does not match any configured audience");
                return Err(FederatorTokenError::NoMatchingKey { kid: header.kid });
            }
        }

        let client_id = claims
            .client_id
            .clone()
            .or_else(|| claims.sub.clone())
            .unwrap_or_default();

        Ok(JwtToken {
            raw: token.to_string(),
            token_type: "Bearer",
            expires_at: claims.exp,
            client_id,
            claims: serde_json::to_value(&claims).unwrap_or(serde_json::Value::Null),
        })
    }
}

fn now_epoch_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// `true` once `expires_at - buffer_secs <= now` (spec.md section 3's
/// `JwtToken` invariant).
fn token_is_expiring(expires_at: i64, buffer_secs: i64, now: i64) -> bool {
    expires_at - buffer_secs <= now
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_expiring_respects_buffer() {
        let now = now_epoch_secs();
        assert!(!token_is_expiring(now + 60, 30, now));
        assert!(token_is_expiring(now + 10, 30, now));
        assert!(token_is_expiring(now - 5, 30, now));
    }

    #[test]
    fn audience_claim_matches_any_configured_audience() {
        let wanted = vec!["federator-consumer".to_string(), "other".to_string()];
        assert!(AudienceClaim::One("federator-consumer".to_string()).contains(&wanted));
        assert!(!AudienceClaim::One("unrelated".to_string()).contains(&wanted));
        assert!(AudienceClaim::Many(vec!["a".to_string(), "other".to_string()]).contains(&wanted));
    }
}
