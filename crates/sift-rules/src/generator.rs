//! Rule generation from analyzed SQL.
//!
//! Turns a working BI query into three artifacts: a YAML rules
//! fragment, an MCP tool descriptor, and a ready-to-paste catalog entry
//! embedding the SQL in a literal block scalar. Output is fully
//! deterministic: key order and content depend only on the analysis
//! and the provided metadata.

use crate::analyzer::{analyze_query, QueryStructure, SqlAnalysis};
use serde::Serialize;
use serde_json::{json, Map, Value};

/// The three artifacts emitted for one query.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedRules {
    /// YAML rules fragment describing the query's shape and rules.
    pub yaml_rules: String,
    /// MCP tool descriptor with an input schema conditioned on the
    /// analysis.
    pub tool_descriptor: Value,
    /// Catalog entry snippet with the SQL verbatim in a block literal.
    pub code_snippet: String,
}

/// Serialized in declaration order; this is the stable key order of
/// the YAML fragment.
#[derive(Serialize)]
struct YamlRulesDoc<'a> {
    name: &'a str,
    description: &'a str,
    category: &'a str,
    intent_keywords: &'a [String],
    structure: QueryStructure,
    tables: Vec<String>,
    joins: Vec<String>,
    ctes: Vec<String>,
    date_filters: Vec<YamlDateFilter>,
    timezone_buckets: Vec<String>,
    exclusions: Vec<YamlExclusion>,
    validation: Vec<String>,
    sql: &'a str,
}

#[derive(Serialize)]
struct YamlDateFilter {
    column: String,
    pattern: String,
    has_timezone: bool,
}

#[derive(Serialize)]
struct YamlExclusion {
    kind: String,
    column: String,
    values: Vec<String>,
}

/// Validation checks derived from what the analyzer actually saw.
fn derived_validation(analysis: &SqlAnalysis) -> Vec<String> {
    let mut checks = Vec::new();
    if !analysis.timezone_conversions.is_empty() {
        checks.push("Timezone shift applied to timestamp comparisons.".to_string());
    }
    if !analysis.exclusions.is_empty() {
        checks.push("Exclusion filters preserved.".to_string());
    }
    if !analysis.distinct_counts.is_empty() {
        checks.push("Distinct counts on entity ids.".to_string());
    }
    if !analysis.progressive_filters.is_empty() {
        checks.push("Progressive day-of-month comparison preserved.".to_string());
    }
    checks
}

/// Generate the three artifacts for a query.
pub fn generate_rules(
    sql: &str,
    pattern_name: &str,
    description: &str,
    category: &str,
    intent_keywords: &[String],
) -> GeneratedRules {
    let analysis = analyze_query(sql);

    let doc = YamlRulesDoc {
        name: pattern_name,
        description,
        category,
        intent_keywords,
        structure: analysis.structure,
        tables: analysis
            .tables
            .iter()
            .map(|t| match &t.alias {
                Some(alias) => format!("{} ({})", t.name, alias),
                None => t.name.clone(),
            })
            .collect(),
        joins: analysis
            .joins
            .iter()
            .map(|j| format!("{} {}", j.join_type, j.table))
            .collect(),
        ctes: analysis.ctes.iter().map(|c| c.name.clone()).collect(),
        date_filters: analysis
            .date_filters
            .iter()
            .map(|f| YamlDateFilter {
                column: f.column.clone(),
                pattern: f.pattern.clone(),
                has_timezone: f.has_timezone,
            })
            .collect(),
        timezone_buckets: analysis
            .timezone_conversions
            .iter()
            .map(|t| t.bucket.clone())
            .collect(),
        exclusions: analysis
            .exclusions
            .iter()
            .map(|e| YamlExclusion {
                kind: e.kind.clone(),
                column: e.column.clone(),
                values: e.values.clone(),
            })
            .collect(),
        validation: derived_validation(&analysis),
        sql,
    };
    let yaml_rules =
        serde_yaml::to_string(&doc).unwrap_or_else(|e| format!("# serialization failed: {e}"));

    GeneratedRules {
        yaml_rules,
        tool_descriptor: tool_descriptor(pattern_name, description, &analysis),
        code_snippet: catalog_entry_snippet(
            sql,
            pattern_name,
            description,
            category,
            intent_keywords,
            &analysis,
        ),
    }
}

/// Input schema properties are conditioned on the analysis: date
/// parameters only when the query has date filters, the exclusions
/// toggle only when it has exclusions, `limit` always.
fn tool_descriptor(pattern_name: &str, description: &str, analysis: &SqlAnalysis) -> Value {
    let mut properties = Map::new();
    if !analysis.date_filters.is_empty() {
        properties.insert(
            "start_date".to_string(),
            json!({ "type": "string", "description": "Override the window start (YYYY-MM-DD)." }),
        );
        properties.insert(
            "end_date".to_string(),
            json!({ "type": "string", "description": "Override the window end (YYYY-MM-DD)." }),
        );
    }
    if !analysis.exclusions.is_empty() {
        properties.insert(
            "apply_exclusions".to_string(),
            json!({ "type": "boolean", "description": "Keep the query's exclusion filters.", "default": true }),
        );
    }
    properties.insert(
        "limit".to_string(),
        json!({ "type": "integer", "description": "Maximum rows to return." }),
    );

    json!({
        "name": pattern_name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": [],
        }
    })
}

/// A catalog entry ready to paste into the rules YAML, with the SQL
/// verbatim inside a literal block scalar.
fn catalog_entry_snippet(
    sql: &str,
    pattern_name: &str,
    description: &str,
    category: &str,
    intent_keywords: &[String],
    analysis: &SqlAnalysis,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("{pattern_name}:\n"));
    out.push_str(&format!("  description: {description}\n"));
    out.push_str(&format!("  category: {category}\n"));
    out.push_str(&format!("  keywords: [{}]\n", intent_keywords.join(", ")));
    if let Some(filter) = analysis.date_filters.first() {
        out.push_str(&format!("  date_filter: {}\n", filter.pattern));
    }
    out.push_str("  sql: |\n");
    for line in sql.trim_end().lines() {
        if line.trim().is_empty() {
            out.push('\n');
        } else {
            out.push_str(&format!("    {line}\n"));
        }
    }
    out
}
