use serde_json::{json, Map, Value};

use crate::result::NodeResult;

/// State visible to nodes during one run. Never shared between runs.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub input: Value,
    /// Node id → serialized [`NodeResult`] of every node attempted so far.
    pub nodes: Map<String, Value>,
    /// Output of the most recent successful node.
    pub last_output: Value,
}

impl RunContext {
    /// A null input is treated as an empty object.
    pub fn new(input: Value) -> Self {
        let input = if input.is_null() {
            Value::Object(Map::new())
        } else {
            input
        };
        Self {
            input,
            nodes: Map::new(),
            last_output: Value::Null,
        }
    }

    pub fn record(&mut self, node_id: &str, result: &NodeResult) {
        let value = serde_json::to_value(result).unwrap_or(Value::Null);
        self.nodes.insert(node_id.to_string(), value);
        if result.success {
            self.last_output = result.output.clone();
        }
    }

    /// Scope templates resolve against. `lastOutput` mirrors `last_output`.
    pub fn template_scope(&self) -> Value {
        json!({
            "input": self.input,
            "nodes": self.nodes,
            "last_output": self.last_output,
            "lastOutput": self.last_output,
        })
    }
}
