use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use hyperflow_core::error::Result;
use hyperflow_core::traits::ToolExecutor;

use super::lenient::{opt_i64, opt_string};
use super::{parse_config, NodeExecutor};
use crate::context::RunContext;
use crate::graph::NodeType;
use crate::result::NodeResult;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolConfig {
    #[serde(default, alias = "tool_name", alias = "name", deserialize_with = "opt_string")]
    tool_name: Option<String>,
    #[serde(default, alias = "project_id", deserialize_with = "opt_i64")]
    project_id: Option<i64>,
    #[serde(default, alias = "project_name", deserialize_with = "opt_string")]
    project_name: Option<String>,
    #[serde(default)]
    arguments: Value,
}

/// Delegates to the tool collaborator.
pub struct ToolNode {
    tools: Arc<dyn ToolExecutor>,
}

impl ToolNode {
    pub fn new(tools: Arc<dyn ToolExecutor>) -> Self {
        Self { tools }
    }

    async fn run(&self, config: Value) -> Result<NodeResult> {
        let cfg: ToolConfig = parse_config(NodeType::Tool, config)?;

        let Some(tool_name) = cfg.tool_name else {
            return Ok(NodeResult::failure("Tool node requires 'toolName'"));
        };
        // Project ids start at 1; zero means unset.
        let Some(project_id) = cfg.project_id.filter(|id| *id != 0) else {
            return Ok(NodeResult::failure("Tool node requires 'projectId'"));
        };
        let project_name = cfg
            .project_name
            .unwrap_or_else(|| format!("project_{}", project_id));
        let arguments = if cfg.arguments.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            cfg.arguments
        };

        debug!(tool = %tool_name, project_id, "Dispatching tool node");
        let outcome = self
            .tools
            .execute(project_id, &project_name, &tool_name, arguments)
            .await;

        if outcome.success {
            Ok(NodeResult {
                description: outcome.description,
                ..NodeResult::success(outcome.output)
            })
        } else {
            let description = outcome
                .description
                .unwrap_or_else(|| format!("Tool '{}' failed", tool_name));
            Ok(NodeResult {
                output: Value::String(description.clone()),
                description: Some(description.clone()),
                ..NodeResult::failure(description)
            })
        }
    }
}

impl NodeExecutor for ToolNode {
    fn execute<'a>(&'a self, config: Value, _ctx: &'a RunContext) -> BoxFuture<'a, Result<NodeResult>> {
        Box::pin(self.run(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperflow_core::types::ToolOutcome;
    use hyperflow_test_utils::MockToolExecutor;
    use serde_json::json;

    #[tokio::test]
    async fn test_success_passes_payload_through() {
        let mock = Arc::new(
            MockToolExecutor::new().with_outcome("filesystem", ToolOutcome::success(json!(["a.txt"]))),
        );
        let node = ToolNode::new(mock.clone());

        let result = node
            .run(json!({
                "toolName": "filesystem",
                "projectId": "7",
                "arguments": {"action": "list"}
            }))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output, json!(["a.txt"]));

        let calls = mock.calls();
        assert_eq!(calls[0].project_id, 7);
        assert_eq!(calls[0].project_name, "project_7");
        assert_eq!(calls[0].arguments, json!({"action": "list"}));
    }

    #[tokio::test]
    async fn test_failure_carries_description() {
        let mock = Arc::new(MockToolExecutor::new());
        let node = ToolNode::new(mock.clone());

        let result = node
            .run(json!({"name": "missing", "project_id": 3, "projectName": "demo"}))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.output, json!("Tool 'missing' not found"));
        assert_eq!(result.error.as_deref(), Some("Tool 'missing' not found"));
        assert_eq!(mock.calls()[0].project_name, "demo");
        assert_eq!(mock.calls()[0].arguments, json!({}));
    }

    #[tokio::test]
    async fn test_project_id_required() {
        let mock = Arc::new(MockToolExecutor::new());
        let node = ToolNode::new(mock.clone());

        for config in [
            json!({"toolName": "filesystem"}),
            json!({"toolName": "filesystem", "projectId": ""}),
            json!({"toolName": "filesystem", "projectId": 0}),
        ] {
            let result = node.run(config).await.unwrap();
            assert!(!result.success);
            assert!(result.error.unwrap().contains("projectId"));
        }
        assert!(node.run(json!({"projectId": 1})).await.unwrap().error.unwrap().contains("toolName"));
        assert!(mock.calls().is_empty());
    }
}
