//! IDP/Credential Broker configuration. Field names follow spec.md section
//! 6's `idp.*` options; parsed with `envconfig` the way `capture::Config`
//! and `common_kafka::KafkaConfig` are.

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct IdpConfig {
    pub idp_token_url: String,
    pub idp_jwks_url: String,
    pub idp_client_id: String,
    pub idp_client_secret: Option<String>,

    #[envconfig(default = "false")]
    pub idp_mtls_enabled: bool,
    pub idp_truststore_path: Option<String>,
    pub idp_truststore_password: Option<String>,
    pub idp_keystore_path: Option<String>,
    pub idp_keystore_password: Option<String>,

    #[envconfig(default = "1000")]
    pub idp_token_backoff_ms: u64,

    /// CSV of audiences the Configuration Resolver trusts; empty means no
    /// audience check (spec.md: "when an audience list is configured").
    pub idp_token_audiences_csv: Option<String>,

    #[envconfig(default = "30")]
    pub idp_token_buffer_secs: i64,

    #[envconfig(default = "default")]
    pub management_node_id: String,
}

impl IdpConfig {
    pub fn audiences(&self) -> Vec<String> {
        self.idp_token_audiences_csv
            .as_deref()
            .map(|csv| csv.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }

    /// Builds the HTTP client used for the token endpoint and JWKS fetch.
    /// When `idp.mtls.enabled` is set, the client presents the configured
    /// keystore as its client identity and trusts the configured truststore,
    /// matching spec.md section 4.2's "mTLS flow... TLS context built from a
    /// client keystore and a truststore". Otherwise a plain client is
    /// returned and the client-secret flow carries the credential instead.
    pub fn build_http_client(&self) -> Result<reqwest::Client, crate::error::FederatorTokenError> {
        let mut builder = reqwest::Client::builder();

        if self.idp_mtls_enabled {
            let keystore_path = self
                .idp_keystore_path
                .as_deref()
                .expect("idp.mtls.enabled requires idp.keystore.path");
            let keystore_bytes = std::fs::read(keystore_path)
                .map_err(|e| crate::error::FederatorTokenError::Parse(format!("reading keystore {keystore_path}: {e}")))?;
            let password = self.idp_keystore_password.as_deref().unwrap_or("");
            let identity = reqwest::Identity::from_pkcs12_der(&keystore_bytes, password)
                .map_err(crate::error::FederatorTokenError::Http)?;
            builder = builder.identity(identity);

            if let Some(truststore_path) = &self.idp_truststore_path {
                let truststore_bytes = std::fs::read(truststore_path)
                    .map_err(|e| crate::error::FederatorTokenError::Parse(format!("reading truststore {truststore_path}: {e}")))?;
                let ca = reqwest::Certificate::from_der(&truststore_bytes)
                    .or_else(|_| reqwest::Certificate::from_pem(&truststore_bytes))
                    .map_err(crate::error::FederatorTokenError::Http)?;
                builder = builder.add_root_certificate(ca);
            }
        }

        builder.build().map_err(crate::error::FederatorTokenError::Http)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audiences_splits_and_trims_csv() {
        let config = IdpConfig {
            idp_token_url: String::new(),
            idp_jwks_url: String::new(),
            idp_client_id: String::new(),
            idp_client_secret: None,
            idp_mtls_enabled: false,
            idp_truststore_path: None,
            idp_truststore_password: None,
            idp_keystore_path: None,
            idp_keystore_password: None,
            idp_token_backoff_ms: 1000,
            idp_token_audiences_csv: Some(" federator-consumer , other ".to_string()),
            idp_token_buffer_secs: 30,
            management_node_id: "default".to_string(),
        };
        assert_eq!(config.audiences(), vec!["federator-consumer".to_string(), "other".to_string()]);
    }

    #[test]
    fn audiences_empty_when_unconfigured() {
        let config = IdpConfig {
            idp_token_url: String::new(),
            idp_jwks_url: String::new(),
            idp_client_id: String::new(),
            idp_client_secret: None,
            idp_mtls_enabled: false,
            idp_truststore_path: None,
            idp_truststore_password: None,
            idp_keystore_path: None,
            idp_keystore_password: None,
            idp_token_backoff_ms: 1000,
            idp_token_audiences_csv: None,
            idp_token_buffer_secs: 30,
            management_node_id: "default".to_string(),
        };
        assert!(config.audiences().is_empty());
    }
}
