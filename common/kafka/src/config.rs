//! `kafka.*` configuration (spec.md section 6). Mirrors
//! `common_kafka::config::KafkaConfig`'s flat envconfig struct shape.

use std::collections::HashMap;
use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    pub kafka_bootstrap_servers: String,
    pub kafka_consumer_group: String,

    #[envconfig(default = "500")]
    pub kafka_poll_records: u32,

    /// ISO-8601 duration, e.g. `PT2S`. Only the seconds/millis forms spec.md's
    /// examples use are parsed; anything else falls back to the 2s default.
    #[envconfig(default = "PT2S")]
    pub kafka_poll_duration: String,

    #[envconfig(default = "0")]
    pub kafka_offset: i64,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    /// Raw `kafka.additional.*` pass-through, applied verbatim to the
    /// underlying `rdkafka::ClientConfig` (spec.md section 6).
    #[envconfig(default = "")]
    additional_csv: String,
}

impl KafkaConfig {
    pub fn poll_duration(&self) -> Duration {
        parse_iso8601_duration(&self.kafka_poll_duration).unwrap_or(Duration::from_secs(2))
    }

    /// `additional_csv` is `key1=value1,key2=value2`; malformed pairs are skipped.
    pub fn additional(&self) -> HashMap<String, String> {
        self.additional_csv
            .split(',')
            .filter_map(|pair| {
                let (k, v) = pair.split_once('=')?;
                let (k, v) = (k.trim(), v.trim());
                if k.is_empty() {
                    None
                } else {
                    Some((k.to_string(), v.to_string()))
                }
            })
            .collect()
    }
}

/// Parses the small subset of ISO-8601 durations (`PT<n>S`, `PT<n>M`) that
/// `kafka.pollDuration` actually takes; anything else returns `None` and the
/// caller falls back to the documented default.
fn parse_iso8601_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let rest = raw.strip_prefix("PT")?;
    let (digits, unit) = rest.split_at(rest.len().checked_sub(1)?);
    let n: u64 = digits.parse().ok()?;
    match unit {
        "S" => Some(Duration::from_secs(n)),
        "M" => Some(Duration::from_secs(n * 60)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seconds() {
        assert_eq!(parse_iso8601_duration("PT2S"), Some(Duration::from_secs(2)));
    }

    #[test]
    fn parses_minutes() {
        assert_eq!(parse_iso8601_duration("PT1M"), Some(Duration::from_secs(60)));
    }

    #[test]
    fn rejects_malformed() {
        assert_eq!(parse_iso8601_duration("2s"), None);
    }

    #[test]
    fn additional_parses_csv_pairs() {
        let config = KafkaConfig {
            kafka_bootstrap_servers: "localhost:9092".to_string(),
            kafka_consumer_group: "g".to_string(),
            kafka_poll_records: 500,
            kafka_poll_duration: "PT2S".to_string(),
            kafka_offset: 0,
            kafka_tls: false,
            additional_csv: "socket.timeout.ms=5000, fetch.min.bytes=1".to_string(),
        };
        let additional = config.additional();
        assert_eq!(additional.get("socket.timeout.ms").map(String::as_str), Some("5000"));
        assert_eq!(additional.get("fetch.min.bytes").map(String::as_str), Some("1"));
    }
}
