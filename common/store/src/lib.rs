//! Offset Store Adapter (spec.md section 4.9): wraps the external
//! key-value store (Redis) with encryption-at-rest for values, a global key
//! prefix, and TTL for cached tokens.
//!
//! Grounded on `common-redis`'s `RedisClient` (a thin wrapper over a
//! `MultiplexedConnection` with a `CustomRedisError` taxonomy and a pickle
//! vs. UTF-8 value-format switch) generalized from Django-pickle
//! compatibility to the four primitives spec.md names:
//! `getOffset`/`setOffset`/`getValue`/`setValue`. AES-GCM at-rest encryption
//! follows `abitofhelp-adaptive_pipeline`'s encryption adapter (nonce
//! prepended to ciphertext, `aead::Aead` trait, `Aes256Gcm`).

use std::time::Duration;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use rand::RngCore;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{info, warn};

const SMOKE_TEST_KEY: &str = "__federator_offset_store_smoke_test__";
const SMOKE_TEST_VALUE: &str = "ok";
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("decryption failed, value may be corrupt or the aes key changed")]
    Decrypt,
    #[error("stored ciphertext is shorter than the nonce")]
    Truncated,
    #[error("smoke test failed: wrote {expected:?}, read back {actual:?}")]
    SmokeTestFailed { expected: String, actual: String },
}

/// Configuration for [`OffsetStore::connect`]. Mirrors spec.md section 6's
/// `redis.*` options.
#[derive(Clone, Debug)]
pub struct OffsetStoreConfig {
    pub host: String,
    pub port: u16,
    pub tls_enabled: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    /// 32-byte AES-256 key. When `None`, values are stored as plain JSON.
    pub aes_key: Option<[u8; 32]>,
    pub prefix: Option<String>,
}

impl Default for OffsetStoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            tls_enabled: true,
            username: None,
            password: None,
            aes_key: None,
            prefix: None,
        }
    }
}

impl OffsetStoreConfig {
    fn connection_url(&self) -> String {
        let scheme = if self.tls_enabled { "rediss" } else { "redis" };
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => format!("{scheme}://{u}:{p}@{}:{}", self.host, self.port),
            (None, Some(p)) => format!("{scheme}://:{p}@{}:{}", self.host, self.port),
            _ => format!("{scheme}://{}:{}", self.host, self.port),
        }
    }
}

/// Offset Store Adapter. One instance is shared by the Streaming Conductor
/// (offsets/sequence ids) and the Credential Broker (token cache).
#[derive(Clone)]
pub struct OffsetStore {
    connection: redis::aio::MultiplexedConnection,
    cipher: Option<Aes256Gcm>,
    prefix: Option<String>,
}

impl OffsetStore {
    /// Connects and runs the first-use smoke test: write a known value,
    /// read it back, assert equality. Per spec.md's open question, this
    /// adapter adopts fail-fast — a smoke test mismatch aborts startup.
    pub async fn connect(config: OffsetStoreConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.connection_url())?;
        let connection = client.get_multiplexed_async_connection().await?;
        let cipher = config.aes_key.map(|k| Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&k)));
        let store = Self {
            connection,
            cipher,
            prefix: config.prefix,
        };
        store.smoke_test().await?;
        Ok(store)
    }

    async fn smoke_test(&self) -> Result<(), StoreError> {
        self.set_value(SMOKE_TEST_KEY, &SMOKE_TEST_VALUE.to_string(), None)
            .await?;
        let read_back: Option<String> = self.get_value(SMOKE_TEST_KEY).await?;
        match read_back {
            Some(v) if v == SMOKE_TEST_VALUE => {
                info!("offset store smoke test passed");
                Ok(())
            }
            Some(other) => Err(StoreError::SmokeTestFailed {
                expected: SMOKE_TEST_VALUE.to_string(),
                actual: other,
            }),
            None => Err(StoreError::SmokeTestFailed {
                expected: SMOKE_TEST_VALUE.to_string(),
                actual: "<absent>".to_string(),
            }),
        }
    }

    fn prefixed(&self, key: &str) -> String {
        match &self.prefix {
            Some(p) => format!("{p}:{key}"),
            None => key.to_string(),
        }
    }

    fn offset_key(client_id: &str, topic: &str) -> String {
        format!("topic:{client_id}-{topic}:offset")
    }

    pub fn token_key(management_node_id: &str) -> String {
        format!("management_node_{management_node_id}_access_token")
    }

    /// Returns the stored offset for (client, topic), or 0 when absent.
    pub async fn get_offset(&self, client_id: &str, topic: &str) -> Result<i64, StoreError> {
        let key = Self::offset_key(client_id, topic);
        let raw: Option<String> = self.get_raw(&key).await?;
        match raw {
            Some(s) => Ok(s.trim().parse::<i64>().unwrap_or(0)),
            None => Ok(0),
        }
    }

    pub async fn set_offset(&self, client_id: &str, topic: &str, value: i64) -> Result<(), StoreError> {
        let key = Self::offset_key(client_id, topic);
        self.set_raw(&key, &value.to_string(), None).await
    }

    /// Evicts a cached value (e.g. a token evicted on a 401 from the IDP).
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let full_key = self.prefixed(key);
        let mut conn = self.connection.clone();
        let _: () = conn.del(&full_key).await?;
        Ok(())
    }

    /// Typed read, JSON-decoded, decrypted if this store has an AES key.
    pub async fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get_raw(key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Typed write, JSON-encoded, encrypted at rest if this store has an AES key.
    pub async fn set_value<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(value)?;
        self.set_raw(key, &json, ttl).await
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        let full_key = self.prefixed(key);
        let mut conn = self.connection.clone();
        let stored: Option<String> = conn.get(&full_key).await?;
        match stored {
            None => Ok(None),
            Some(s) => match &self.cipher {
                Some(cipher) => Ok(Some(decrypt(cipher, &s)?)),
                None => Ok(Some(s)),
            },
        }
    }

    async fn set_raw(&self, key: &str, plaintext: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let full_key = self.prefixed(key);
        let stored = match &self.cipher {
            Some(cipher) => encrypt(cipher, plaintext),
            None => plaintext.to_string(),
        };
        let mut conn = self.connection.clone();
        match ttl {
            Some(d) => {
                let secs = d.as_secs().max(1);
                let _: () = conn.set_ex(&full_key, stored, secs).await?;
            }
            None => {
                let _: () = conn.set(&full_key, stored).await?;
            }
        }
        Ok(())
    }

}

fn encrypt(cipher: &Aes256Gcm, plaintext: &str) -> String {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    // encrypt() never fails for AES-GCM with a valid key/nonce.
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .expect("aes-gcm encryption is infallible for valid inputs");
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    base64::engine::general_purpose::STANDARD.encode(out)
}

fn decrypt(cipher: &Aes256Gcm, stored: &str) -> Result<String, StoreError> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(stored)
        .map_err(|_| StoreError::Decrypt)?;
    if raw.len() < NONCE_LEN {
        return Err(StoreError::Truncated);
    }
    let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);
    let plaintext = cipher.decrypt(nonce, ciphertext).map_err(|e| {
        warn!(error = %e, "offset store decryption failed");
        StoreError::Decrypt
    })?;
    String::from_utf8(plaintext).map_err(|_| StoreError::Decrypt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_key_matches_spec_format() {
        assert_eq!(
            OffsetStore::offset_key("acme", "orders"),
            "topic:acme-orders:offset"
        );
    }

    #[test]
    fn token_key_matches_spec_format() {
        assert_eq!(
            OffsetStore::token_key("default"),
            "management_node_default_access_token"
        );
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = [7u8; 32];
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let ciphertext = encrypt(&cipher, "hello world");
        let plaintext = decrypt(&cipher, &ciphertext).unwrap();
        assert_eq!(plaintext, "hello world");
    }

    #[test]
    fn decrypt_rejects_truncated_ciphertext() {
        let key = [7u8; 32];
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let short = base64::engine::general_purpose::STANDARD.encode([1, 2, 3]);
        assert!(matches!(decrypt(&cipher, &short), Err(StoreError::Truncated)));
    }
}
