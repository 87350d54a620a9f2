use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use hyperflow_core::error::Result;

use super::lenient::opt_f64;
use super::{parse_config, NodeExecutor};
use crate::context::RunContext;
use crate::graph::NodeType;
use crate::result::NodeResult;

#[derive(Debug, Deserialize)]
struct WaitConfig {
    #[serde(default, deserialize_with = "opt_f64")]
    seconds: Option<f64>,
}

/// Sleeps, then succeeds with null output.
pub struct WaitNode;

impl WaitNode {
    async fn run(&self, config: Value) -> Result<NodeResult> {
        let cfg: WaitConfig = parse_config(NodeType::Wait, config)?;
        let seconds = cfg
            .seconds
            .filter(|s| s.is_finite())
            .unwrap_or(0.0)
            .max(0.0);

        debug!(seconds, "Waiting");
        if seconds > 0.0 {
            // Beyond Duration's range the wait saturates.
            let delay = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX);
            tokio::time::sleep(delay).await;
        }
        Ok(NodeResult::success(Value::Null))
    }
}

impl NodeExecutor for WaitNode {
    fn execute<'a>(&'a self, config: Value, _ctx: &'a RunContext) -> BoxFuture<'a, Result<NodeResult>> {
        Box::pin(self.run(config))
    }
}
