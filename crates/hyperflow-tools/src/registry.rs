use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use hyperflow_core::error::{HyperflowError, Result};
use hyperflow_core::traits::ToolExecutor;
use hyperflow_core::types::{ToolDefinition, ToolOutcome};

/// Where and for whom a tool is running.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub project_id: i64,
    pub project_name: String,
    /// `<data_dir>/projects/<project_name>`; may not exist yet.
    pub workspace: PathBuf,
}

/// A named capability callable from Tool nodes.
pub trait Tool: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for tool arguments.
    fn input_schema(&self) -> serde_json::Value;

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<serde_json::Value>>;

    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Registry of available tools; the engine's tool collaborator.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    data_dir: PathBuf,
}

impl ToolRegistry {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            tools: HashMap::new(),
            data_dir: data_dir.into(),
        }
    }

    /// Create a registry with all built-in tools registered.
    pub fn with_builtins(data_dir: impl Into<PathBuf>) -> Self {
        let mut registry = Self::new(data_dir);
        registry.register(crate::builtin::FileSystemTool);
        registry
    }

    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    fn workspace_for(&self, project_name: &str) -> Result<PathBuf> {
        let name = project_name.trim();
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\'])
        {
            return Err(HyperflowError::ToolValidation(format!(
                "invalid project name '{}'",
                project_name
            )));
        }
        Ok(self.data_dir.join("projects").join(name))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    async fn run(
        &self,
        tool: Arc<dyn Tool>,
        project_id: i64,
        project_name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let ctx = ToolContext {
            project_id,
            project_name: project_name.to_string(),
            workspace: self.workspace_for(project_name)?,
        };
        let timeout = Duration::from_secs(tool.timeout_secs());

        match tokio::time::timeout(timeout, tool.execute(arguments, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(HyperflowError::ToolExecution {
                tool: tool.name().to_string(),
                message: format!("timed out after {}s", tool.timeout_secs()),
            }),
        }
    }
}

impl ToolExecutor for ToolRegistry {
    fn execute<'a>(
        &'a self,
        project_id: i64,
        project_name: &'a str,
        tool_name: &'a str,
        arguments: serde_json::Value,
    ) -> BoxFuture<'a, ToolOutcome> {
        Box::pin(async move {
            let Some(tool) = self.get(tool_name) else {
                return ToolOutcome::failure(format!("Tool '{}' not found", tool_name));
            };

            debug!(tool = tool_name, project_id, "Executing tool");
            match self.run(tool, project_id, project_name, arguments).await {
                Ok(output) => ToolOutcome::success(output),
                Err(e) => {
                    warn!(tool = tool_name, project_id, error = %e, "Tool failed");
                    ToolOutcome::failure(e.to_string())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo arguments back"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        fn execute(
            &self,
            input: serde_json::Value,
            ctx: ToolContext,
        ) -> BoxFuture<'_, Result<serde_json::Value>> {
            Box::pin(async move { Ok(json!({"project": ctx.project_name, "input": input})) })
        }
    }

    struct SlowTool;

    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Never finishes in time"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        fn execute(
            &self,
            _input: serde_json::Value,
            _ctx: ToolContext,
        ) -> BoxFuture<'_, Result<serde_json::Value>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(serde_json::Value::Null)
            })
        }
        fn timeout_secs(&self) -> u64 {
            1
        }
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new("/tmp/hyperflow-test");
        let outcome = registry.execute(1, "p", "nope", json!({})).await;
        assert!(!outcome.success);
        assert!(outcome.output.is_null());
        assert_eq!(outcome.description.as_deref(), Some("Tool 'nope' not found"));
    }

    #[tokio::test]
    async fn test_success_passes_output_through() {
        let mut registry = ToolRegistry::new("/tmp/hyperflow-test");
        registry.register(EchoTool);
        let outcome = registry.execute(7, "demo", "echo", json!({"a": 1})).await;
        assert!(outcome.success);
        assert_eq!(outcome.output, json!({"project": "demo", "input": {"a": 1}}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_failure() {
        let mut registry = ToolRegistry::new("/tmp/hyperflow-test");
        registry.register(SlowTool);
        let outcome = registry.execute(1, "p", "slow", json!({})).await;
        assert!(!outcome.success);
        assert!(outcome.description.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_invalid_project_name_rejected() {
        let mut registry = ToolRegistry::new("/tmp/hyperflow-test");
        registry.register(EchoTool);
        for bad in ["", "..", "a/b"] {
            let outcome = registry.execute(1, bad, "echo", json!({})).await;
            assert!(!outcome.success, "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_builtins_listed() {
        let registry = ToolRegistry::with_builtins("/tmp/hyperflow-test");
        assert_eq!(registry.list(), vec!["filesystem"]);
        assert_eq!(registry.definitions()[0].name, "filesystem");
    }
}
