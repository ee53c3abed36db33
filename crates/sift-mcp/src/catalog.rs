//! The tool catalog: declarative specs plus the shared handler
//! context.

use crate::error::McpError;
use crate::protocol::ToolDefinition;
use crate::redash::RedashClient;
use serde_json::Value;
use sift_acl::AclEngine;
use sift_adapter_pg::ReadOnlyPg;
use sift_rules::RulesCatalog;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Everything a handler body may touch. Built once at startup and
/// passed explicitly; there are no process-wide singletons.
pub struct ToolContext {
    /// Read-only relational pool. Absent in catalog-only deployments;
    /// database tools then fail with a clean backend error.
    pub pg: Option<ReadOnlyPg>,
    pub acl: Arc<AclEngine>,
    pub rules: &'static RulesCatalog,
    pub redash: RedashClient,
    /// Identity assumed when neither the call nor the transport
    /// session carries an email.
    pub fallback_email: Option<String>,
}

/// A handler returns the textual tool payload or an error the gate
/// folds into an `isError` result.
pub type HandlerResult = Result<String, McpError>;

type BoxedHandler = Arc<
    dyn Fn(Arc<ToolContext>, Value) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>>
        + Send
        + Sync,
>;

/// One tool: wire definition plus handler body.
#[derive(Clone)]
pub struct ToolSpec {
    pub definition: ToolDefinition,
    handler: BoxedHandler,
}

impl ToolSpec {
    /// Build a spec from an async handler function.
    pub fn new<F, Fut>(
        name: &str,
        description: &str,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Arc<ToolContext>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            definition: ToolDefinition {
                name: name.to_string(),
                description: Some(description.to_string()),
                input_schema,
            },
            handler: Arc::new(move |ctx, args| Box::pin(handler(ctx, args))),
        }
    }

    /// Invoke the handler body.
    pub async fn invoke(&self, ctx: Arc<ToolContext>, args: Value) -> HandlerResult {
        (self.handler)(ctx, args).await
    }
}

/// The registry: tools in declaration order plus compiled input
/// validators.
pub struct ToolCatalog {
    tools: Vec<ToolSpec>,
    validators: HashMap<String, jsonschema::Validator>,
}

impl ToolCatalog {
    /// Build a catalog from specs, compiling each input schema.
    pub fn new(tools: Vec<ToolSpec>) -> Result<Self, McpError> {
        let mut validators = HashMap::new();
        for spec in &tools {
            let validator = jsonschema::draft202012::options()
                .build(&spec.definition.input_schema)
                .map_err(|e| {
                    McpError::StartupFailed(format!(
                        "input schema for tool '{}' does not compile: {e}",
                        spec.definition.name
                    ))
                })?;
            validators.insert(spec.definition.name.clone(), validator);
        }
        Ok(Self { tools, validators })
    }

    /// The standard Sift catalog (§ tool handlers).
    pub fn standard() -> Result<Self, McpError> {
        Self::new(crate::handlers::standard_tools())
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.definition.name == name)
    }

    /// All definitions, in declaration order.
    pub fn definitions(&self) -> Vec<&ToolDefinition> {
        self.tools.iter().map(|t| &t.definition).collect()
    }

    /// All tool names, in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.definition.name.as_str()).collect()
    }

    /// Validate arguments against a tool's input schema. Returns the
    /// concatenated field messages on failure.
    pub fn validate_input(&self, name: &str, args: &Value) -> Result<(), McpError> {
        let Some(validator) = self.validators.get(name) else {
            return Err(McpError::NotFound(format!("tool {name}")));
        };
        let messages: Vec<String> = validator
            .iter_errors(args)
            .map(|e| e.to_string())
            .collect();
        if messages.is_empty() {
            Ok(())
        } else {
            Err(McpError::InvalidInput(messages.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> ToolCatalog {
        ToolCatalog::standard().unwrap()
    }

    #[test]
    fn standard_catalog_has_the_full_tool_set() {
        let names = catalog()
            .names()
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        for required in [
            "query",
            "list_tables",
            "describe_table",
            "list_schemas",
            "get_sales_funnel_context",
            "classify_sales_intent",
            "get_query_template",
            "list_query_patterns",
            "analyze_query",
            "generate_rules",
            "fetch_redash_query",
            "generate_rules_from_redash",
        ] {
            assert!(names.contains(&required.to_string()), "missing {required}");
        }
    }

    #[test]
    fn every_input_schema_is_an_object_schema() {
        for def in catalog().definitions() {
            assert_eq!(def.input_schema["type"], "object", "{}", def.name);
        }
    }

    #[test]
    fn validation_concatenates_field_messages() {
        let catalog = catalog();
        let err = catalog
            .validate_input("generate_rules", &json!({"sql": 5}))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("invalid input:"));
        // Both the type error and the missing required fields appear.
        assert!(msg.contains("pattern_name") || msg.contains("required"));
    }

    #[test]
    fn valid_input_passes() {
        let catalog = catalog();
        assert!(catalog
            .validate_input("query", &json!({"sql": "SELECT 1"}))
            .is_ok());
        assert!(catalog
            .validate_input("query", &json!({"sql": "SELECT 1", "params": [1, "a"]}))
            .is_ok());
    }
}
