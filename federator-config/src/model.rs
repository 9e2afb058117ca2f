//! Producer/consumer topology tree (spec.md section 3/4.3): the
//! Configuration Resolver's in-memory, snapshot-published view of the
//! Management Node's authoritative configuration.

use std::collections::HashMap;

use federator_filter::Attribute;
use serde::Deserialize;

/// Whether a (server, topic) pair carries plain records or chunked files;
/// decides which of the two producer-side RPCs (spec.md sections 4.5/4.6) a
/// Streaming Conductor opens for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamKind {
    #[default]
    Record,
    File,
}

/// One product offered by a producer: a topic, the consumers allowed to
/// read it, and the filter attributes required of each of those consumers.
#[derive(Debug, Clone, Deserialize)]
pub struct Product {
    pub topic: String,
    pub consumers: Vec<String>,
    /// consumer id -> required attributes (key/value), as delivered by the
    /// Management Node. Attribute lookups are case-insensitive per spec.md
    /// section 3, so callers should prefer [`Product::attributes_for`].
    #[serde(default)]
    pub attributes: HashMap<String, HashMap<String, String>>,
}

impl Product {
    fn matches_topic(&self, topic: &str) -> bool {
        self.topic.eq_ignore_ascii_case(topic)
    }

    fn has_consumer(&self, consumer_id: &str) -> bool {
        self.consumers.iter().any(|c| c.eq_ignore_ascii_case(consumer_id))
    }

    fn attributes_for(&self, consumer_id: &str) -> Vec<Attribute> {
        self.attributes
            .iter()
            .find(|(id, _)| id.eq_ignore_ascii_case(consumer_id))
            .map(|(_, kv)| kv.iter().map(|(k, v)| Attribute::new(k, v)).collect())
            .unwrap_or_default()
    }
}

/// One producer's configuration: the products (topics) it offers.
#[derive(Debug, Clone, Deserialize)]
pub struct ProducerEntry {
    pub client_id: String,
    pub products: Vec<Product>,
}

/// A consumer's authorization to read from a producer's topic.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerProducerLink {
    pub producer_client_id: String,
    pub topic: String,
    #[serde(default)]
    pub kind: StreamKind,
}

/// One consumer's configuration: the producers/topics it is authorized to
/// read, with its own copy of the filter attributes (informational; the
/// authoritative attributes for filtering live on the producer side, see
/// [`TopologySnapshot::filter_attributes_for`]).
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerEntry {
    pub client_id: String,
    pub links: Vec<ConsumerProducerLink>,
}

/// Immutable snapshot of the full topology, as published by the
/// Configuration Resolver. Readers hold an `Arc<TopologySnapshot>` and never
/// observe a partially-updated tree.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopologySnapshot {
    #[serde(default)]
    pub producers: Vec<ProducerEntry>,
    #[serde(default)]
    pub consumers: Vec<ConsumerEntry>,
}

impl TopologySnapshot {
    /// True iff *any* producer/product in the snapshot matches `topic`
    /// (case-insensitive on topic name) and lists a consumer whose id
    /// matches `consumer_id` (case-insensitive).
    ///
    /// spec.md section 4.3 flags that an earlier revision only checked the
    /// first producer; this snapshot adopts "all producers" per the
    /// resolved open question (see DESIGN.md).
    pub fn has_consumer_access(&self, consumer_id: &str, topic: &str) -> bool {
        self.producers.iter().any(|producer| {
            producer
                .products
                .iter()
                .any(|p| p.matches_topic(topic) && p.has_consumer(consumer_id))
        })
    }

    /// Filter attributes collected across *all* matching products/consumers;
    /// empty when nothing matches.
    pub fn filter_attributes_for(&self, consumer_id: &str, topic: &str) -> Vec<Attribute> {
        self.producers
            .iter()
            .flat_map(|p| p.products.iter())
            .filter(|p| p.matches_topic(topic) && p.has_consumer(consumer_id))
            .flat_map(|p| p.attributes_for(consumer_id))
            .collect()
    }

    /// Producers a given consumer is authorized against, per its own
    /// consumer entry (used by the consumer side to know what to request).
    pub fn producers_for_consumer(&self, consumer_id: &str) -> Vec<&ConsumerProducerLink> {
        self.consumers
            .iter()
            .find(|c| c.client_id.eq_ignore_ascii_case(consumer_id))
            .map(|c| c.links.iter().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> TopologySnapshot {
        let mut attrs = HashMap::new();
        attrs.insert("B".to_string(), HashMap::from([("NATIONALITY".to_string(), "UK".to_string())]));
        TopologySnapshot {
            producers: vec![
                ProducerEntry {
                    client_id: "p1".to_string(),
                    products: vec![Product {
                        topic: "orders".to_string(),
                        consumers: vec!["A".to_string(), "B".to_string()],
                        attributes: attrs,
                    }],
                },
                ProducerEntry {
                    client_id: "p2".to_string(),
                    products: vec![Product {
                        topic: "shipments".to_string(),
                        consumers: vec!["C".to_string()],
                        attributes: HashMap::new(),
                    }],
                },
            ],
            consumers: vec![],
        }
    }

    #[test]
    fn access_checks_all_producers_not_just_first() {
        let snap = snapshot();
        assert!(snap.has_consumer_access("C", "shipments"));
        assert!(snap.has_consumer_access("A", "orders"));
    }

    #[test]
    fn access_is_case_insensitive_on_topic_and_consumer() {
        let snap = snapshot();
        assert!(snap.has_consumer_access("a", "ORDERS"));
    }

    #[test]
    fn access_denied_for_unlisted_consumer() {
        let snap = snapshot();
        assert!(!snap.has_consumer_access("Z", "orders"));
    }

    #[test]
    fn filter_attributes_collected_across_matches() {
        let snap = snapshot();
        let attrs = snap.filter_attributes_for("B", "orders");
        assert_eq!(attrs, vec![Attribute::new("nationality", "uk")]);
    }

    #[test]
    fn filter_attributes_empty_when_nothing_matches() {
        let snap = snapshot();
        assert!(snap.filter_attributes_for("A", "orders").is_empty());
    }
}
