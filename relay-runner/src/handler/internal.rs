//! Built-in `internal` agent

use std::collections::HashMap;

use async_trait::async_trait;
use relay_core::HandlerError;
use relay_core::domain::step::Document;
use serde_json::{Map, Value};

use super::StepHandler;

/// Merges dependency outputs and the step's parameters into one document
///
/// Object outputs are flattened in dependency-name order; any other output
/// is nested under its step name. Parameters are applied last and win.
pub struct MergeHandler;

#[async_trait]
impl StepHandler for MergeHandler {
    async fn handle(
        &self,
        params: &Document,
        dependency_outputs: &HashMap<String, Document>,
    ) -> Result<Document, HandlerError> {
        let mut merged = Map::new();

        let mut names: Vec<&String> = dependency_outputs.keys().collect();
        names.sort();

        for name in names {
            match &dependency_outputs[name] {
                Value::Object(fields) => {
                    merged.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                other => {
                    merged.insert(name.clone(), other.clone());
                }
            }
        }

        match params {
            Value::Object(fields) => {
                merged.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Value::Null => {}
            _ => {
                return Err(HandlerError::InvalidInput(
                    "internal step parameters must be an object".to_string(),
                ));
            }
        }

        Ok(Value::Object(merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_merges_outputs_then_params() {
        let deps = HashMap::from([
            ("jira_fetch".to_string(), json!({ "title": "Login", "prd": "old" })),
            ("notes".to_string(), json!("free text")),
        ]);

        let out = MergeHandler
            .handle(&json!({ "prd": "override" }), &deps)
            .await
            .unwrap();

        assert_eq!(out["title"], "Login");
        assert_eq!(out["prd"], "override");
        assert_eq!(out["notes"], "free text");
    }

    #[tokio::test]
    async fn test_rejects_non_object_params() {
        let err = MergeHandler
            .handle(&json!([1, 2]), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidInput(_)));
    }
}
