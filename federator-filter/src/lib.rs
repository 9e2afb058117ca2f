//! Header Filter Engine (spec.md section 4.4): parses the `Security-Label`
//! record header into a canonical uppercase key/value map and decides
//! whether a record is released to a given consumer.
//!
//! The "dynamic reflection for custom filters" design note is answered with
//! a registry of named constructors (`FilterRegistry`) rather than runtime
//! class loading: unknown names fall back to the built-in filter and log a
//! warning, exactly as spec.md section 4.4 and the section 9 design note
//! require.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

pub const SECURITY_LABEL_HEADER: &str = "Security-Label";

/// One filter attribute a consumer requires for a topic: `(key, value)`,
/// already uppercased by the Configuration Resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into().to_uppercase(),
            value: value.into().to_uppercase(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("malformed security label segment: {0:?}")]
    MalformedSegment(String),
}

/// A parsed `Security-Label` header: canonical uppercase key -> uppercase value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityLabel {
    attrs: BTreeMap<String, String>,
}

impl SecurityLabel {
    /// Parses a comma-separated `K=V`/`K:V` list. Whitespace around
    /// segments and around the delimiter is trimmed; empty segments
    /// (`",K=V,,K2=V2,"`) are ignored. Each non-empty segment must contain
    /// `=` or `:` (whichever appears first) with non-empty trimmed sides,
    /// otherwise the whole label fails to parse.
    pub fn parse(raw: &str) -> Result<Self, LabelError> {
        let mut attrs = BTreeMap::new();
        for segment in raw.split(',') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let delim_pos = segment
                .char_indices()
                .find(|(_, c)| *c == '=' || *c == ':')
                .map(|(i, _)| i);
            let Some(i) = delim_pos else {
                return Err(LabelError::MalformedSegment(segment.to_string()));
            };
            let key = segment[..i].trim();
            let value = segment[i + 1..].trim();
            if key.is_empty() || value.is_empty() {
                return Err(LabelError::MalformedSegment(segment.to_string()));
            }
            attrs.insert(key.to_uppercase(), value.to_uppercase());
        }
        Ok(Self { attrs })
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.attrs
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attrs.get(&key.to_uppercase()).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

/// A record as seen by the filter engine: payload bytes plus raw headers.
/// The Record Stream Service owns the full wire `Record`; this is the
/// minimal view the filter needs.
pub struct FilterableRecord<'a> {
    pub security_label: Option<&'a str>,
}

/// Custom per-consumer filter plugin contract (spec.md section 4.4). The
/// plugin *loader* that resolves a fully-qualified name to an instance is
/// out of scope; this trait is the contract the loader produces instances
/// of. `filter_out` returns `true` when the record should be dropped.
pub trait CustomFilter: Send + Sync {
    fn filter_out(&self, record: &FilterableRecord<'_>) -> bool;
}

/// Registry of custom filter constructors keyed by fully-qualified name.
/// Unknown names fall back to the built-in policy with a logged warning —
/// this is the in-scope half of the "filter contract"; the loader that
/// populates this registry from configuration is out of scope.
#[derive(Default, Clone)]
pub struct FilterRegistry {
    filters: std::collections::HashMap<String, Arc<dyn CustomFilter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, fully_qualified_name: impl Into<String>, filter: Arc<dyn CustomFilter>) {
        let name = fully_qualified_name.into();
        tracing::info!(filter = %name, "registered custom filter");
        self.filters.insert(name, filter);
    }

    pub fn lookup(&self, fully_qualified_name: &str) -> Option<Arc<dyn CustomFilter>> {
        match self.filters.get(fully_qualified_name) {
            Some(f) => Some(f.clone()),
            None => {
                warn!(
                    filter = fully_qualified_name,
                    "custom filter not found, falling back to built-in filter"
                );
                None
            }
        }
    }
}

/// The Header Filter Engine. Stateless beyond the custom filter registry;
/// one instance is shared across all (consumer, topic) decisions.
#[derive(Default, Clone)]
pub struct FilterEngine {
    registry: FilterRegistry,
}

impl FilterEngine {
    pub fn new(registry: FilterRegistry) -> Self {
        Self { registry }
    }

    /// Built-in decision: keep the record unless some required attribute
    /// excludes it. An attribute whose key is absent from the label does
    /// not exclude. A record with no label at all is dropped if any
    /// attribute is required.
    pub fn decide_builtin(required: &[Attribute], label: Option<&SecurityLabel>) -> bool {
        if required.is_empty() {
            return true;
        }
        let Some(label) = label else {
            return false;
        };
        required.iter().all(|attr| match label.get(&attr.key) {
            None => true,
            Some(actual) => actual.eq_ignore_ascii_case(&attr.value),
        })
    }

    /// Full decision for one record: parses the raw label (propagating
    /// [`LabelError`] so the caller can drop-and-log per spec.md section 7),
    /// then applies either a named custom filter or the built-in policy.
    pub fn evaluate(
        &self,
        required: &[Attribute],
        raw_label: Option<&str>,
        custom_filter_name: Option<&str>,
    ) -> Result<bool, LabelError> {
        let parsed = match raw_label {
            Some(raw) => Some(SecurityLabel::parse(raw)?),
            None => None,
        };

        if let Some(name) = custom_filter_name {
            if let Some(filter) = self.registry.lookup(name) {
                let record = FilterableRecord {
                    security_label: raw_label,
                };
                return Ok(!filter.filter_out(&record));
            }
        }

        Ok(Self::decide_builtin(required, parsed.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trip() {
        let label = SecurityLabel::parse("K1=V1,K2:V2").unwrap();
        assert_eq!(label.get("k1"), Some("V1"));
        assert_eq!(label.get("K2"), Some("V2"));
    }

    #[test]
    fn parse_ignores_empty_segments() {
        let a = SecurityLabel::parse("K1=V1,K2=V2").unwrap();
        let b = SecurityLabel::parse(",K1=V1,,K2=V2,").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parse_empty_input_is_empty_map() {
        let label = SecurityLabel::parse("").unwrap();
        assert!(label.is_empty());
    }

    #[test]
    fn parse_rejects_malformed_segment() {
        let err = SecurityLabel::parse("bad").unwrap_err();
        assert_eq!(err, LabelError::MalformedSegment("bad".to_string()));
    }

    #[test]
    fn parse_rejects_empty_key_or_value() {
        assert!(SecurityLabel::parse("=V1").is_err());
        assert!(SecurityLabel::parse("K1=").is_err());
    }

    #[test]
    fn decide_keeps_when_attribute_absent() {
        let required = vec![Attribute::new("nationality", "uk")];
        let label = SecurityLabel::parse("OTHER=X").unwrap();
        assert!(FilterEngine::decide_builtin(&required, Some(&label)));
    }

    #[test]
    fn decide_keeps_on_exact_match_case_insensitive() {
        let required = vec![Attribute::new("nationality", "uk")];
        let label = SecurityLabel::parse("Nationality=uk").unwrap();
        assert!(FilterEngine::decide_builtin(&required, Some(&label)));
    }

    #[test]
    fn decide_drops_on_mismatch() {
        let required = vec![Attribute::new("nationality", "uk")];
        let label = SecurityLabel::parse("NATIONALITY=US").unwrap();
        assert!(!FilterEngine::decide_builtin(&required, Some(&label)));
    }

    #[test]
    fn decide_drops_absent_label_when_attribute_required() {
        let required = vec![Attribute::new("nationality", "uk")];
        assert!(!FilterEngine::decide_builtin(&required, None));
    }

    #[test]
    fn decide_keeps_absent_label_when_nothing_required() {
        assert!(FilterEngine::decide_builtin(&[], None));
    }

    #[test]
    fn decide_requires_all_attributes_to_pass() {
        let required = vec![
            Attribute::new("nationality", "uk"),
            Attribute::new("clearance", "secret"),
        ];
        let label = SecurityLabel::parse("NATIONALITY=UK,CLEARANCE=CONFIDENTIAL").unwrap();
        assert!(!FilterEngine::decide_builtin(&required, Some(&label)));
    }

    #[test]
    fn evaluate_keeps_matching_nationality_drops_mismatched_case_insensitively() {
        let engine = FilterEngine::default();
        let required = vec![Attribute::new("nationality", "uk")];
        assert!(engine.evaluate(&required, Some("NATIONALITY=UK"), None).unwrap());
        assert!(!engine.evaluate(&required, Some("NATIONALITY=US"), None).unwrap());
        assert!(engine.evaluate(&required, Some("NATIONALITY=uk"), None).unwrap());
    }

    #[test]
    fn evaluate_propagates_parse_error() {
        let engine = FilterEngine::default();
        let err = engine.evaluate(&[], Some("bad"), None).unwrap_err();
        assert!(matches!(err, LabelError::MalformedSegment(_)));
    }

    struct AlwaysExclude;
    impl CustomFilter for AlwaysExclude {
        fn filter_out(&self, _record: &FilterableRecord<'_>) -> bool {
            true
        }
    }

    #[test]
    fn evaluate_unknown_custom_filter_falls_back_to_builtin() {
        let engine = FilterEngine::default();
        let required = vec![Attribute::new("nationality", "uk")];
        assert!(engine
            .evaluate(&required, Some("NATIONALITY=UK"), Some("com.example.Missing"))
            .unwrap());
    }

    #[test]
    fn evaluate_uses_registered_custom_filter() {
        let mut registry = FilterRegistry::new();
        registry.register("com.example.AlwaysExclude", Arc::new(AlwaysExclude));
        let engine = FilterEngine::new(registry);
        let kept = engine
            .evaluate(&[], Some("ANYTHING=X"), Some("com.example.AlwaysExclude"))
            .unwrap();
        assert!(!kept);
    }
}
