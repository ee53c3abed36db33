//! Catalog lookups served as tool payloads.

use crate::catalog::RulesCatalog;
use crate::RulesError;
use serde_json::{json, Map, Value};

/// The full intelligence document behind `get_sales_funnel_context`:
/// every rule section the LLM needs before writing funnel SQL.
pub fn intelligence_document(catalog: &RulesCatalog) -> Value {
    json!({
        "core_rules": catalog.core_rules,
        "date_filters": catalog.date_filters,
        "funnel_stages": catalog.funnel_stages,
        "metrics": catalog.metrics,
        "source_mapping": catalog.source_mapping,
        "status_logic": catalog.status_logic,
        "anti_patterns": catalog.anti_patterns,
        "validation_checklist": catalog.validation_checklist,
        "referenced_tables": catalog.referenced_tables,
    })
}

/// Summary list behind `list_query_patterns`.
pub fn list_query_patterns(catalog: &RulesCatalog) -> Value {
    let patterns: Vec<Value> = catalog
        .patterns
        .iter()
        .map(|(name, p)| {
            json!({
                "name": name,
                "description": p.description,
                "category": p.category,
                "keywords": p.keywords,
            })
        })
        .collect();
    json!({ "patterns": patterns })
}

/// The full rule package for one named pattern, with every reference
/// dereferenced: core rule texts, the date filter definition, the
/// shared stage/metric/source/status sections, and any special-logic
/// notes reachable from the pattern's dotted key paths.
pub fn get_query_template(catalog: &RulesCatalog, name: &str) -> Result<Value, RulesError> {
    let pattern = catalog.pattern(name)?;

    let core_rules: Map<String, Value> = pattern
        .core_rules
        .iter()
        .filter_map(|r| {
            catalog
                .core_rules
                .get(r)
                .map(|text| (r.clone(), Value::String(text.clone())))
        })
        .collect();

    let date_filter = pattern.date_filter.as_ref().and_then(|df| {
        catalog
            .date_filters
            .get(df)
            .map(|def| json!({ "name": df, "description": def.description, "sql": def.sql }))
    });

    let special_logic: Map<String, Value> = pattern
        .special_logic_refs
        .iter()
        .filter_map(|path| {
            catalog
                .special_logic_at(path)
                .map(|v| (path.clone(), v.clone()))
        })
        .collect();

    Ok(json!({
        "name": name,
        "description": pattern.description,
        "category": pattern.category,
        "keywords": pattern.keywords,
        "sql": pattern.sql,
        "core_rules": core_rules,
        "date_filter": date_filter,
        "funnel_stages": catalog.funnel_stages,
        "metrics": catalog.metrics,
        "source_mapping": catalog.source_mapping,
        "status_logic": catalog.status_logic,
        "validation": pattern.validation,
        "anti_patterns": catalog.anti_patterns,
        "special_logic": special_logic,
    }))
}
