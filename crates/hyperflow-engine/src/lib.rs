//! Workflow execution.
//!
//! A [`WorkflowGraph`] is walked from its entrypoint one node at a time. Each
//! node's config is rendered against the [`RunContext`] by the
//! [`TemplateResolver`], handed to the executor for its [`NodeType`], and the
//! resulting [`NodeResult`] becomes visible to every later node.

pub mod context;
pub mod engine;
pub mod graph;
pub mod nodes;
pub mod result;
pub mod template;

pub use context::RunContext;
pub use engine::WorkflowEngine;
pub use graph::{Edge, GraphIssue, Node, NodeType, WorkflowGraph};
pub use nodes::{NodeExecutor, NodeExecutors};
pub use result::{NodeResult, RunResult};
pub use template::TemplateResolver;
