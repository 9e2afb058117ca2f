//! Producer-process configuration (spec.md section 6): `server.*` transport
//! options plus the nested Kafka/IDP/Redis/object-store sub-configs, in the
//! same flat-envconfig-struct shape as `capture::config::Config`.

use std::time::Duration;

use common_kafka::KafkaConfig;
use common_store::OffsetStoreConfig;
use envconfig::Envconfig;
use federator_auth::IdpConfig;

#[derive(Envconfig, Clone, Debug)]
pub struct ServerConfig {
    #[envconfig(default = "8080")]
    pub server_port: u16,

    #[envconfig(default = "5")]
    pub server_keep_alive_time_secs: u64,

    #[envconfig(default = "1")]
    pub server_keep_alive_timeout_secs: u64,

    #[envconfig(default = "true")]
    pub server_tls_enabled: bool,

    pub server_cert_chain_file: Option<String>,
    pub server_private_key_file: Option<String>,
    pub server_ca_pem: Option<String>,

    /// Base URL of this process's own object store for LOCAL file descriptors.
    #[envconfig(default = "/tmp/federator-files")]
    pub file_source_local_base_dir: String,

    #[envconfig(default = "1000000")]
    pub file_stream_chunk_size: usize,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub idp: IdpConfig,

    pub redis_host: Option<String>,
    #[envconfig(default = "6379")]
    pub redis_port: u16,
    #[envconfig(default = "true")]
    pub redis_tls_enabled: bool,
    pub redis_username: Option<String>,
    pub redis_password: Option<String>,
    /// Hex-encoded 32-byte AES-256 key (spec.md section 6's `redis.aes.key`).
    /// When unset, offset-store values are stored as plain JSON.
    pub redis_aes_key: Option<String>,
    pub redis_prefix: Option<String>,

    pub management_node_base_url: String,

    #[envconfig(default = "health")]
    pub health_component_name: String,

    #[envconfig(default = "9090")]
    pub admin_port: u16,

    /// When unset, `SourceType::S3` file descriptors fail with
    /// `ProviderNotConfigured` instead of being wired to a live client.
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_access_key_id: Option<String>,
    pub s3_secret_access_key: Option<String>,
}

impl ServerConfig {
    pub fn keep_alive_time(&self) -> Duration {
        Duration::from_secs(self.server_keep_alive_time_secs)
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_secs(self.server_keep_alive_timeout_secs)
    }

    pub fn offset_store_config(&self) -> OffsetStoreConfig {
        OffsetStoreConfig {
            host: self.redis_host.clone().unwrap_or_else(|| "localhost".to_string()),
            port: self.redis_port,
            tls_enabled: self.redis_tls_enabled,
            username: self.redis_username.clone(),
            password: self.redis_password.clone(),
            aes_key: parse_aes_key(self.redis_aes_key.as_deref()),
            prefix: self.redis_prefix.clone(),
        }
    }
}

/// Decodes `redis.aes.key` (hex-encoded) into the 32-byte key
/// `OffsetStoreConfig` expects. Panics on a malformed key: a typo here
/// should fail startup loudly rather than silently disable encryption.
fn parse_aes_key(hex_key: Option<&str>) -> Option<[u8; 32]> {
    let hex_key = hex_key?;
    let bytes = hex::decode(hex_key).expect("redis.aes.key must be hex-encoded");
    let key: [u8; 32] = bytes.try_into().expect("redis.aes.key must decode to exactly 32 bytes");
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_valid_hex_aes_key() {
        let hex_key = "00".repeat(32);
        assert_eq!(parse_aes_key(Some(&hex_key)), Some([0u8; 32]));
    }

    #[test]
    fn returns_none_when_unconfigured() {
        assert_eq!(parse_aes_key(None), None);
    }
}
