//! Tool handler bodies.
//!
//! Each handler receives the shared [`ToolContext`] and its validated
//! arguments and returns the textual payload. ACL checks and schema
//! validation happen in the server gate before these run.

use crate::catalog::{HandlerResult, ToolContext, ToolSpec};
use crate::error::McpError;
use crate::redash::parse_query_ids;
use serde_json::{json, Value};
use sift_adapter_pg::{introspect, ReadOnlyPg};
use sift_rules::{analyze_query, classify_sales_intent, generate_rules, template};
use std::sync::Arc;

/// The standard tool set, in catalog order.
pub fn standard_tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(
            "query",
            "Run a read-only SQL query against the primary database. \
             Use positional parameters ($1, $2, ...) with the params array; \
             never inline user-supplied values.",
            json!({
                "type": "object",
                "properties": {
                    "sql": { "type": "string", "description": "The SQL to execute." },
                    "params": {
                        "type": "array",
                        "description": "Positional parameter values.",
                        "items": {}
                    }
                },
                "required": ["sql"]
            }),
            query,
        ),
        ToolSpec::new(
            "list_tables",
            "List tables and views in a schema (default: public).",
            json!({
                "type": "object",
                "properties": {
                    "schema": { "type": "string" }
                }
            }),
            list_tables,
        ),
        ToolSpec::new(
            "describe_table",
            "Describe a table: columns, primary key and foreign keys.",
            json!({
                "type": "object",
                "properties": {
                    "table_name": { "type": "string" },
                    "schema": { "type": "string" }
                },
                "required": ["table_name"]
            }),
            describe_table,
        ),
        ToolSpec::new(
            "list_schemas",
            "List non-system schemas in the primary database.",
            json!({ "type": "object", "properties": {} }),
            list_schemas,
        ),
        ToolSpec::new(
            "get_sales_funnel_context",
            "The full funnel intelligence document: core rules, date \
             filters, stages, metrics, source mapping, status logic, \
             anti-patterns and the validation checklist.",
            json!({ "type": "object", "properties": {} }),
            get_sales_funnel_context,
        ),
        ToolSpec::new(
            "classify_sales_intent",
            "Classify a natural-language question against the funnel \
             keyword groups and suggest matching query patterns.",
            json!({
                "type": "object",
                "properties": {
                    "question": { "type": "string" }
                },
                "required": ["question"]
            }),
            classify_intent,
        ),
        ToolSpec::new(
            "get_query_template",
            "The full rule package for one named query pattern.",
            json!({
                "type": "object",
                "properties": {
                    "pattern_name": { "type": "string" }
                },
                "required": ["pattern_name"]
            }),
            get_query_template,
        ),
        ToolSpec::new(
            "list_query_patterns",
            "Summary list of the known query patterns.",
            json!({ "type": "object", "properties": {} }),
            list_query_patterns,
        ),
        ToolSpec::new(
            "analyze_query",
            "Structural analysis of a SQL query: tables, joins, CTEs, \
             date filters, exclusions, CASE blocks and more.",
            json!({
                "type": "object",
                "properties": {
                    "sql": { "type": "string" }
                },
                "required": ["sql"]
            }),
            analyze,
        ),
        ToolSpec::new(
            "generate_rules",
            "Analyze a SQL query and emit catalog material: a YAML rules \
             fragment, a tool descriptor and a catalog entry snippet.",
            json!({
                "type": "object",
                "properties": {
                    "sql": { "type": "string" },
                    "pattern_name": { "type": "string" },
                    "description": { "type": "string" },
                    "category": { "type": "string" },
                    "intent_keywords": {
                        "type": "array",
                        "items": { "type": "string" }
                    }
                },
                "required": ["sql", "pattern_name", "description", "category"]
            }),
            generate,
        ),
        ToolSpec::new(
            "fetch_redash_query",
            "Fetch saved queries from the BI store by id. Accepts a \
             comma- or whitespace-separated id list.",
            json!({
                "type": "object",
                "properties": {
                    "query_ids": { "type": "string" }
                },
                "required": ["query_ids"]
            }),
            fetch_redash,
        ),
        ToolSpec::new(
            "generate_rules_from_redash",
            "Fetch saved BI queries and run the rule generator on each.",
            json!({
                "type": "object",
                "properties": {
                    "query_ids": { "type": "string" },
                    "category": { "type": "string" },
                    "intent_keywords": {
                        "type": "array",
                        "items": { "type": "string" }
                    }
                },
                "required": ["query_ids"]
            }),
            generate_from_redash,
        ),
    ]
}

fn pg(ctx: &ToolContext) -> Result<&ReadOnlyPg, McpError> {
    ctx.pg
        .as_ref()
        .ok_or_else(|| McpError::Backend("no database configured".to_string()))
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, McpError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| McpError::InvalidInput(format!("missing field '{key}'")))
}

fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn string_array(args: &Value, key: &str) -> Vec<String> {
    args.get(key)
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn to_pretty(value: &impl serde::Serialize) -> HandlerResult {
    serde_json::to_string_pretty(value).map_err(McpError::from)
}

async fn query(ctx: Arc<ToolContext>, args: Value) -> HandlerResult {
    let sql = required_str(&args, "sql")?;
    let params = args
        .get("params")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let output = pg(&ctx)?.execute_read_only(sql, &params).await?;
    to_pretty(&output)
}

async fn list_tables(ctx: Arc<ToolContext>, args: Value) -> HandlerResult {
    let out = introspect::list_tables(pg(&ctx)?, optional_str(&args, "schema")).await?;
    to_pretty(&out)
}

async fn describe_table(ctx: Arc<ToolContext>, args: Value) -> HandlerResult {
    let table = required_str(&args, "table_name")?;
    let out = introspect::describe_table(pg(&ctx)?, table, optional_str(&args, "schema")).await?;
    to_pretty(&out)
}

async fn list_schemas(ctx: Arc<ToolContext>, _args: Value) -> HandlerResult {
    let out = introspect::list_schemas(pg(&ctx)?).await?;
    to_pretty(&out)
}

async fn get_sales_funnel_context(ctx: Arc<ToolContext>, _args: Value) -> HandlerResult {
    to_pretty(&template::intelligence_document(ctx.rules))
}

async fn classify_intent(ctx: Arc<ToolContext>, args: Value) -> HandlerResult {
    let question = required_str(&args, "question")?;
    to_pretty(&classify_sales_intent(question, ctx.rules))
}

async fn get_query_template(ctx: Arc<ToolContext>, args: Value) -> HandlerResult {
    let name = required_str(&args, "pattern_name")?;
    let package = template::get_query_template(ctx.rules, name)?;
    to_pretty(&package)
}

async fn list_query_patterns(ctx: Arc<ToolContext>, _args: Value) -> HandlerResult {
    to_pretty(&template::list_query_patterns(ctx.rules))
}

async fn analyze(_ctx: Arc<ToolContext>, args: Value) -> HandlerResult {
    let sql = required_str(&args, "sql")?;
    to_pretty(&analyze_query(sql))
}

async fn generate(_ctx: Arc<ToolContext>, args: Value) -> HandlerResult {
    let sql = required_str(&args, "sql")?;
    let pattern_name = required_str(&args, "pattern_name")?;
    let description = required_str(&args, "description")?;
    let category = required_str(&args, "category")?;
    let keywords = string_array(&args, "intent_keywords");
    to_pretty(&generate_rules(
        sql,
        pattern_name,
        description,
        category,
        &keywords,
    ))
}

async fn fetch_redash(ctx: Arc<ToolContext>, args: Value) -> HandlerResult {
    let ids = parse_query_ids(required_str(&args, "query_ids")?)?;

    let mut results = Vec::new();
    for id in ids {
        match ctx.redash.fetch_query(id).await {
            Ok(q) => results.push(json!({ "id": id, "ok": true, "query": q })),
            Err(e) => results.push(json!({ "id": id, "ok": false, "error": e.to_string() })),
        }
    }
    to_pretty(&json!({ "results": results }))
}

async fn generate_from_redash(ctx: Arc<ToolContext>, args: Value) -> HandlerResult {
    let ids = parse_query_ids(required_str(&args, "query_ids")?)?;
    let category = optional_str(&args, "category").unwrap_or("redash").to_string();
    let keywords = string_array(&args, "intent_keywords");

    let mut results = Vec::new();
    for id in ids {
        match ctx.redash.fetch_query(id).await {
            Ok(q) => {
                let pattern_name = slugify(&q.name);
                let description = q.description.clone().unwrap_or_else(|| q.name.clone());
                let generated =
                    generate_rules(&q.query, &pattern_name, &description, &category, &keywords);
                results.push(json!({
                    "id": id,
                    "ok": true,
                    "pattern_name": pattern_name,
                    "generated": generated,
                }));
            }
            Err(e) => results.push(json!({ "id": id, "ok": false, "error": e.to_string() })),
        }
    }
    to_pretty(&json!({ "results": results }))
}

/// Lowercase a query name into a pattern identifier.
fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_underscore = true;
    for c in name.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    out.trim_end_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("MTD Sales — by Source"), "mtd_sales_by_source");
        assert_eq!(slugify("  Leads!  "), "leads");
    }
}
