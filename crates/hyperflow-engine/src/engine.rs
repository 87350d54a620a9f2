use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use hyperflow_core::error::{HyperflowError, Result};

use crate::context::RunContext;
use crate::graph::{Node, WorkflowGraph};
use crate::nodes::NodeExecutors;
use crate::result::{NodeResult, RunResult};
use crate::template::TemplateResolver;

/// Walks a [`WorkflowGraph`] one node at a time.
///
/// Starting at the entrypoint, each node's config is rendered against the run
/// context and handed to the executor for its type. A failed node stops the
/// run. Otherwise the first edge leaving the node picks the next one, and a
/// node with no outgoing edge ends the run successfully. No node runs twice.
pub struct WorkflowEngine {
    executors: NodeExecutors,
    templates: TemplateResolver,
}

impl WorkflowEngine {
    pub fn new(executors: NodeExecutors) -> Self {
        Self {
            executors,
            templates: TemplateResolver::new(),
        }
    }

    /// Execute `graph` with `input` as the run input.
    ///
    /// Only a structurally unusable graph (no nodes, or colliding ids) is an
    /// `Err`. Everything that goes wrong while walking it, including executor
    /// errors, comes back as a `RunResult` with `success = false`.
    pub async fn run(&self, graph: &WorkflowGraph, input: Value) -> Result<RunResult> {
        let start = Instant::now();
        let nodes = index_nodes(graph)?;
        let run_id = Uuid::new_v4().to_string();

        let mut ctx = RunContext::new(input);
        let mut visited: HashSet<String> = HashSet::new();
        let mut node_results: BTreeMap<String, NodeResult> = BTreeMap::new();
        let mut path: Vec<String> = Vec::new();
        let mut failure: Option<String> = None;
        let mut current = graph.entry_id().map(str::to_string);

        info!(run_id = %run_id, nodes = nodes.len(), entrypoint = ?current, "Workflow run started");

        while let Some(node_id) = current.take() {
            if visited.contains(&node_id) {
                warn!(run_id = %run_id, node_id = %node_id, "Cycle detected, stopping run");
                failure = Some(format!("Cycle detected at node '{}'", node_id));
                break;
            }
            let Some(node) = nodes.get(node_id.as_str()) else {
                warn!(run_id = %run_id, node_id = %node_id, "Node not found, stopping run");
                failure = Some(format!("Node '{}' not found in graph", node_id));
                break;
            };
            visited.insert(node_id.clone());
            path.push(node_id.clone());

            let config = self.templates.render(&node.config, &ctx.template_scope());
            debug!(run_id = %run_id, node_id = %node_id, node_type = %node.node_type, "Dispatching node");

            let node_start = Instant::now();
            let result = match self
                .executors
                .for_type(node.node_type)
                .execute(config, &ctx)
                .await
            {
                Ok(result) => result,
                Err(e) => NodeResult::failure(e.to_string()),
            };
            let elapsed_ms = node_start.elapsed().as_millis() as u64;

            ctx.record(&node_id, &result);
            let succeeded = result.success;
            let node_error = result.error.clone();
            node_results.insert(node_id.clone(), result);

            if !succeeded {
                let message = node_error.unwrap_or_else(|| format!("Node '{}' failed", node_id));
                error!(
                    run_id = %run_id,
                    node_id = %node_id,
                    elapsed_ms,
                    error = %message,
                    "Node failed, stopping run"
                );
                failure = Some(message);
                break;
            }
            debug!(run_id = %run_id, node_id = %node_id, elapsed_ms, "Node complete");

            current = graph.next_after(&node_id).map(str::to_string);
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let success = failure.is_none();
        info!(
            run_id = %run_id,
            success,
            visited = path.len(),
            elapsed_ms,
            "Workflow run finished"
        );

        Ok(RunResult {
            run_id,
            success,
            error: failure,
            node_results,
            path,
            last_output: ctx.last_output,
            elapsed_ms,
        })
    }
}

fn index_nodes(graph: &WorkflowGraph) -> Result<HashMap<&str, &Node>> {
    if graph.nodes.is_empty() {
        return Err(HyperflowError::InvalidGraph("graph has no nodes".into()));
    }
    let mut nodes = HashMap::with_capacity(graph.nodes.len());
    for node in &graph.nodes {
        if nodes.insert(node.id.as_str(), node).is_some() {
            return Err(HyperflowError::InvalidGraph(format!(
                "duplicate node id '{}'",
                node.id
            )));
        }
    }
    Ok(nodes)
}
