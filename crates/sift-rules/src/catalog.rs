//! The embedded intelligence catalog.
//!
//! Parsed once from `funnel_rules.yaml` at first use. The catalog is
//! pure data; the classifier, template lookup and context document all
//! read from it.

use crate::RulesError;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named date-filter template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateFilterDef {
    pub description: String,
    pub sql: String,
}

/// A named metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDef {
    pub description: String,
    #[serde(default)]
    pub formula: Option<String>,
}

/// The canonical source grouping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMapping {
    /// Literal CASE expression to paste into queries.
    pub case_expression: String,
    pub sources: BTreeMap<String, String>,
}

/// One of the nine query patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternDef {
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub core_rules: Vec<String>,
    #[serde(default)]
    pub date_filter: Option<String>,
    #[serde(default)]
    pub validation: Vec<String>,
    /// Dotted paths into `special_logic` (e.g. `status.cancellation`).
    #[serde(default)]
    pub special_logic_refs: Vec<String>,
    pub sql: String,
}

/// One keyword group entry the classifier scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordRule {
    pub keywords: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub required_patterns: Vec<String>,
    #[serde(default)]
    pub date_filter: Option<String>,
}

/// Classifier configuration: four keyword groups plus the fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub default_pattern: String,
    pub keyword_groups: BTreeMap<String, Vec<KeywordRule>>,
}

/// The whole catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesCatalog {
    pub core_rules: BTreeMap<String, String>,
    pub date_filters: BTreeMap<String, DateFilterDef>,
    pub funnel_stages: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, MetricDef>,
    pub source_mapping: SourceMapping,
    pub status_logic: BTreeMap<String, String>,
    pub anti_patterns: Vec<String>,
    pub validation_checklist: Vec<String>,
    pub referenced_tables: Vec<String>,
    /// Nested free-form notes, addressed by dotted key paths.
    pub special_logic: serde_json::Value,
    pub classifier: ClassifierConfig,
    pub patterns: BTreeMap<String, PatternDef>,
}

static BUILTIN: Lazy<RulesCatalog> = Lazy::new(|| {
    RulesCatalog::from_yaml(include_str!("funnel_rules.yaml"))
        .expect("embedded funnel_rules.yaml must parse")
});

impl RulesCatalog {
    /// The embedded catalog.
    pub fn builtin() -> &'static RulesCatalog {
        &BUILTIN
    }

    /// Parse a catalog from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, RulesError> {
        serde_yaml::from_str(content).map_err(|e| RulesError::Catalog(e.to_string()))
    }

    /// Look up a pattern by name.
    pub fn pattern(&self, name: &str) -> Result<&PatternDef, RulesError> {
        self.patterns
            .get(name)
            .ok_or_else(|| RulesError::UnknownPattern(name.to_string()))
    }

    /// Dereference a dotted path into `special_logic`
    /// (`status.cancellation` -> the note text).
    pub fn special_logic_at(&self, path: &str) -> Option<&serde_json::Value> {
        let mut node = &self.special_logic;
        for segment in path.split('.') {
            node = node.get(segment)?;
        }
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_parses_with_nine_patterns() {
        let catalog = RulesCatalog::builtin();
        assert_eq!(catalog.patterns.len(), 9);
        assert!(catalog.patterns.contains_key("leads_mtd_summary"));
        assert!(catalog.patterns.contains_key("sales_mtd_vs_prior_year"));
    }

    #[test]
    fn classifier_has_the_four_groups() {
        let groups = &RulesCatalog::builtin().classifier.keyword_groups;
        for g in ["time_period", "metric", "granularity", "filter"] {
            assert!(groups.contains_key(g), "missing group {g}");
        }
    }

    #[test]
    fn pattern_references_resolve() {
        let catalog = RulesCatalog::builtin();
        for (name, pattern) in &catalog.patterns {
            for rule in &pattern.core_rules {
                assert!(catalog.core_rules.contains_key(rule), "{name}: rule {rule}");
            }
            if let Some(df) = &pattern.date_filter {
                assert!(catalog.date_filters.contains_key(df), "{name}: filter {df}");
            }
            for path in &pattern.special_logic_refs {
                assert!(
                    catalog.special_logic_at(path).is_some(),
                    "{name}: special logic {path}"
                );
            }
        }
    }

    #[test]
    fn classifier_targets_resolve() {
        let catalog = RulesCatalog::builtin();
        let classifier = &catalog.classifier;
        assert!(catalog.patterns.contains_key(&classifier.default_pattern));
        for rules in classifier.keyword_groups.values() {
            for rule in rules {
                for p in &rule.required_patterns {
                    assert!(catalog.patterns.contains_key(p), "required pattern {p}");
                }
                if let Some(df) = &rule.date_filter {
                    assert!(catalog.date_filters.contains_key(df), "date filter {df}");
                }
            }
        }
    }

    #[test]
    fn dotted_special_logic_deref() {
        let catalog = RulesCatalog::builtin();
        let v = catalog.special_logic_at("status.cancellation").unwrap();
        assert!(v.as_str().unwrap().contains("cancelled_at"));
        assert!(catalog.special_logic_at("status.nope").is_none());
    }
}
