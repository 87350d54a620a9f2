//! One executor per [`NodeType`].

pub mod embedded_script;
pub mod external_script;
pub mod http;
mod lenient;
pub mod llm;
pub mod tool;
pub mod wait;

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use hyperflow_core::config::ScriptConfig;
use hyperflow_core::error::{HyperflowError, Result};
use hyperflow_core::traits::ToolExecutor;
use hyperflow_keys::ProviderKeyRotator;
use hyperflow_llm::ProviderRegistry;

use crate::context::RunContext;
use crate::graph::NodeType;
use crate::result::NodeResult;

pub use embedded_script::EmbeddedScriptNode;
pub use external_script::ExternalScriptNode;
pub use http::HttpNode;
pub use llm::LlmNode;
pub use tool::ToolNode;
pub use wait::WaitNode;

/// Runs one kind of node against its rendered config.
///
/// An `Err` is turned into a failed [`NodeResult`] by the engine; executors
/// return `Ok` with `success = false` for failures they can describe
/// themselves.
pub trait NodeExecutor: Send + Sync {
    fn execute<'a>(&'a self, config: Value, ctx: &'a RunContext) -> BoxFuture<'a, Result<NodeResult>>;
}

/// The executor set for a process, built once and shared by every run.
pub struct NodeExecutors {
    llm: LlmNode,
    tool: ToolNode,
    http: HttpNode,
    wait: WaitNode,
    embedded_script: EmbeddedScriptNode,
    external_script: ExternalScriptNode,
}

impl NodeExecutors {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        rotator: Arc<ProviderKeyRotator>,
        tools: Arc<dyn ToolExecutor>,
        scripts: ScriptConfig,
    ) -> Self {
        Self {
            llm: LlmNode::new(providers, rotator),
            tool: ToolNode::new(tools),
            http: HttpNode::new(),
            wait: WaitNode,
            embedded_script: EmbeddedScriptNode::new(scripts.enable_unsafe_exec),
            external_script: ExternalScriptNode::new(scripts),
        }
    }

    pub fn for_type(&self, node_type: NodeType) -> &dyn NodeExecutor {
        match node_type {
            NodeType::Llm => &self.llm,
            NodeType::Tool => &self.tool,
            NodeType::Http => &self.http,
            NodeType::Wait => &self.wait,
            NodeType::EmbeddedScript => &self.embedded_script,
            NodeType::ExternalScript => &self.external_script,
        }
    }
}

/// Deserialize a node config, treating null as an empty object.
pub(crate) fn parse_config<T: DeserializeOwned>(node_type: NodeType, config: Value) -> Result<T> {
    let config = if config.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        config
    };
    serde_json::from_value(config)
        .map_err(|e| HyperflowError::Config(format!("invalid {} node config: {}", node_type, e)))
}
