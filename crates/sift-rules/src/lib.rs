//! # sift-rules
//!
//! The intelligence layer behind the schema-aware tools: a catalog of
//! funnel query patterns with their business rules, a keyword-driven
//! intent classifier, a regex-based SQL analyzer, and a generator that
//! turns analyzed SQL back into catalog material.
//!
//! The analyzer is deliberately regex-based: its job is pattern
//! telemetry on hand-written BI queries, not full SQL parsing. The one
//! structural concession is a balanced-paren scanner for CTE bodies,
//! which flat regexes cannot delimit.

pub mod analyzer;
pub mod catalog;
pub mod generator;
pub mod intent;
pub mod template;

pub use analyzer::{analyze_query, QueryStructure, SqlAnalysis};
pub use catalog::{PatternDef, RulesCatalog};
pub use generator::{generate_rules, GeneratedRules};
pub use intent::{classify_sales_intent, IntentClassification};
pub use template::{get_query_template, intelligence_document, list_query_patterns};

/// Errors surfaced by the rules layer.
#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    #[error("unknown query pattern: {0}")]
    UnknownPattern(String),

    #[error("rules catalog error: {0}")]
    Catalog(String),
}
