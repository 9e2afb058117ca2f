//! Consumer-process configuration (spec.md section 6): `client.*` transport
//! options plus the same nested Kafka/IDP/Redis sub-configs the producer
//! uses, in the same flat-envconfig-struct shape as `federator_server::ServerConfig`.

use std::time::Duration;

use common_kafka::KafkaConfig;
use common_store::OffsetStoreConfig;
use envconfig::Envconfig;
use federator_auth::IdpConfig;

#[derive(Envconfig, Clone, Debug)]
pub struct ClientConfig {
    /// This consumer's own identity, sent as `TopicRequest.client` /
    /// `ApiRequest.client` (informational; the bearer token is what the
    /// producer's auth gate actually trusts).
    pub client_name: String,
    pub client_key: String,

    #[envconfig(default = "30")]
    pub client_keep_alive_time_secs: u64,

    #[envconfig(default = "10")]
    pub client_keep_alive_timeout_secs: u64,

    #[envconfig(default = "10")]
    pub client_idle_timeout_secs: u64,

    /// Base directory for in-flight and completed file assembly (spec.md
    /// section 6's Filesystem layout: `<base>/.parts/...` and `<base>/<name>`).
    #[envconfig(default = "/tmp/federator-files")]
    pub client_files_temp_dir: String,

    /// Path to a JSON file listing the producers (gRPC endpoints) this
    /// consumer connects to; see [`crate::connections::load_connections`].
    pub connections_config_path: String,

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

    #[envconfig(default = "9091")]
    pub admin_port: u16,

    /// How often the Configuration Resolver pulls fresh topology (spec.md
    /// section 4.10 registers this as a periodic Job Scheduler job).
    #[envconfig(default = "30")]
    pub configuration_poll_interval_secs: u64,

    /// How often the supervisor reconciles running Streaming Conductors
    /// against the current snapshot.
    #[envconfig(default = "15")]
    pub supervisor_poll_interval_secs: u64,

    /// When set, completed files are uploaded to this bucket instead of
    /// being kept under `client_files_temp_dir` (spec.md section 4.7's
    /// Received-File Storage provider). Unset means LOCAL.
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_access_key_id: Option<String>,
    pub s3_secret_access_key: Option<String>,
    pub s3_received_files_bucket: Option<String>,
    #[envconfig(default = "false")]
    pub s3_remove_local_after_upload: bool,
}

impl ClientConfig {
    pub fn keep_alive_time(&self) -> Duration {
        Duration::from_secs(self.client_keep_alive_time_secs)
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_secs(self.client_keep_alive_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.client_idle_timeout_secs)
    }

    pub fn configuration_poll_interval(&self) -> Duration {
        Duration::from_secs(self.configuration_poll_interval_secs)
    }

    pub fn supervisor_poll_interval(&self) -> Duration {
        Duration::from_secs(self.supervisor_poll_interval_secs)
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
