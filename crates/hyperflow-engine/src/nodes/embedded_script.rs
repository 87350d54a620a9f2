//! In-process scripts on an embedded Rhai interpreter.
//!
//! The engine is built raw with only the standard packages loaded, so
//! scripts get arithmetic, strings, arrays and maps but no file, network or
//! process access. `eval` is disabled and every run is bounded by operation,
//! depth and size limits.

use futures::future::BoxFuture;
use rhai::packages::{Package, StandardPackage};
use rhai::{Dynamic, Engine, Scope};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use hyperflow_core::error::{HyperflowError, Result};

use super::lenient::opt_string;
use super::{parse_config, NodeExecutor};
use crate::context::RunContext;
use crate::graph::NodeType;
use crate::result::NodeResult;

const DEFAULT_OUTPUT_VARIABLE: &str = "result";
const MAX_OPERATIONS: u64 = 1_000_000;
const MAX_EXPR_DEPTH: usize = 64;
const MAX_FN_EXPR_DEPTH: usize = 32;
const MAX_CALL_LEVELS: usize = 32;
const MAX_STRING_SIZE: usize = 1024 * 1024;
const MAX_COLLECTION_SIZE: usize = 10_000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmbeddedScriptConfig {
    #[serde(default, alias = "source", deserialize_with = "opt_string")]
    code: Option<String>,
    #[serde(default, alias = "output_variable", deserialize_with = "opt_string")]
    output_variable: Option<String>,
    #[serde(default)]
    inputs: Value,
}

fn script_err(e: impl std::fmt::Display) -> HyperflowError {
    HyperflowError::Script(e.to_string())
}

fn sandboxed_engine() -> Engine {
    let mut engine = Engine::new_raw();
    engine.register_global_module(StandardPackage::new().as_shared_module());
    engine.disable_symbol("eval");
    engine
        .set_max_operations(MAX_OPERATIONS)
        .set_max_expr_depths(MAX_EXPR_DEPTH, MAX_FN_EXPR_DEPTH)
        .set_max_call_levels(MAX_CALL_LEVELS)
        .set_max_string_size(MAX_STRING_SIZE)
        .set_max_array_size(MAX_COLLECTION_SIZE)
        .set_max_map_size(MAX_COLLECTION_SIZE);
    engine.on_print(|text| info!(target: "hyperflow::script", "{}", text));
    engine.on_debug(|text, _, pos| debug!(target: "hyperflow::script", position = %pos, "{}", text));
    engine
}

/// Variables a script starts with. Later pushes shadow earlier ones.
struct ScriptVars {
    input: Value,
    nodes: Value,
    last_output: Value,
    context: Value,
    inputs: Value,
}

fn evaluate(code: &str, output_variable: &str, vars: ScriptVars) -> Result<Value> {
    let engine = sandboxed_engine();
    let mut scope = Scope::new();

    let named = [
        ("input", vars.input),
        ("nodes", vars.nodes),
        ("last_output", vars.last_output),
        ("context", vars.context),
    ];
    for (name, value) in named {
        scope.push_dynamic(name, rhai::serde::to_dynamic(value).map_err(script_err)?);
    }
    if let Value::Object(entries) = vars.inputs {
        for (name, value) in entries {
            scope.push_dynamic(name, rhai::serde::to_dynamic(value).map_err(script_err)?);
        }
    }
    scope.push_dynamic(output_variable.to_string(), Dynamic::UNIT);

    engine.run_with_scope(&mut scope, code).map_err(script_err)?;

    match scope.get_value::<Dynamic>(output_variable) {
        Some(out) => rhai::serde::from_dynamic::<Value>(&out).map_err(script_err),
        None => Ok(Value::Null),
    }
}

/// Runs the `python` node type when unsafe execution is enabled.
pub struct EmbeddedScriptNode {
    enabled: bool,
}

impl EmbeddedScriptNode {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    async fn run(&self, config: Value, ctx: &RunContext) -> Result<NodeResult> {
        if !self.enabled {
            warn!(node_type = %NodeType::EmbeddedScript, "Script execution disabled");
            return Ok(NodeResult::failure(format!(
                "{} node execution is disabled. Set scripts.enable_unsafe_exec = true to allow it.",
                NodeType::EmbeddedScript
            )));
        }

        let cfg: EmbeddedScriptConfig = parse_config(NodeType::EmbeddedScript, config)?;
        let code = cfg.code.unwrap_or_default();
        let output_variable = cfg
            .output_variable
            .unwrap_or_else(|| DEFAULT_OUTPUT_VARIABLE.to_string());
        let vars = ScriptVars {
            input: ctx.input.clone(),
            nodes: Value::Object(ctx.nodes.clone()),
            last_output: ctx.last_output.clone(),
            context: ctx.template_scope(),
            inputs: cfg.inputs,
        };

        let output = tokio::task::spawn_blocking(move || evaluate(&code, &output_variable, vars))
            .await
            .map_err(script_err)??;
        Ok(NodeResult::success(output))
    }
}

impl NodeExecutor for EmbeddedScriptNode {
    fn execute<'a>(&'a self, config: Value, ctx: &'a RunContext) -> BoxFuture<'a, Result<NodeResult>> {
        Box::pin(self.run(config, ctx))
    }
}
