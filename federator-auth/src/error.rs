use thiserror::Error;

/// `FederatorTokenError` from spec.md section 4.2: the Credential Broker's
/// outbound failure mode, returned after retries and circuit-breaker
/// bookkeeping are exhausted.
#[derive(Debug, Error)]
pub enum FederatorTokenError {
    #[error("IDP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IDP returned non-success status {0}")]
    NonSuccessStatus(u16),
    #[error("failed to parse IDP response: {0}")]
    Parse(String),
    #[error("token cache error: {0}")]
    Store(#[from] common_store::StoreError),
    #[error("no signing key in JWKS matches kid={kid:?}")]
    NoMatchingKey { kid: Option<String> },
    #[error("token verification failed: {0}")]
    Verification(#[from] jsonwebtoken::errors::Error),
    #[error("circuit breaker open for {endpoint}")]
    CircuitOpen { endpoint: String },
}

impl From<common_retry::RetryError<FederatorTokenError>> for FederatorTokenError {
    fn from(e: common_retry::RetryError<FederatorTokenError>) -> Self {
        match e {
            common_retry::RetryError::CircuitOpen => FederatorTokenError::CircuitOpen {
                endpoint: "idp".to_string(),
            },
            common_retry::RetryError::Exhausted(inner) => inner,
        }
    }
}
