use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{debug, warn};

use hyperflow_core::config::ScriptConfig;
use hyperflow_core::error::{HyperflowError, Result};

use super::lenient::opt_string;
use super::{parse_config, NodeExecutor};
use crate::context::RunContext;
use crate::graph::NodeType;
use crate::result::NodeResult;

#[derive(Debug, Deserialize)]
struct ExternalScriptConfig {
    #[serde(default, alias = "source", deserialize_with = "opt_string")]
    code: Option<String>,
    /// Replaces the run input in the payload when present.
    #[serde(default)]
    input: Option<Value>,
}

/// Wrap user code so it sees `data` and reports `result` as the last line.
fn wrap(code: &str) -> String {
    format!(
        "const data = JSON.parse(process.argv[process.argv.length - 1]);\n\
         let result = null;\n\
         (async () => {{\n\
         {}\n\
         console.log(JSON.stringify({{ output: typeof result === 'undefined' ? null : result }}));\n\
         }})().catch(err => {{\n\
         console.error(err);\n\
         process.exit(1);\n\
         }});\n",
        code
    )
}

/// Pull `output` from the last non-empty stdout line.
fn parse_output(stdout: &str) -> std::result::Result<Value, String> {
    let Some(line) = stdout.lines().rev().map(str::trim).find(|l| !l.is_empty()) else {
        return Err("script produced no output".to_string());
    };
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(mut map)) => map
            .remove("output")
            .ok_or_else(|| format!("script result has no 'output' field: {}", line)),
        _ => Err(format!("malformed script output: {}", line)),
    }
}

/// Runs the `javascript` node type in an external interpreter process.
pub struct ExternalScriptNode {
    config: ScriptConfig,
}

impl ExternalScriptNode {
    pub fn new(config: ScriptConfig) -> Self {
        Self { config }
    }

    async fn run(&self, config: Value, ctx: &RunContext) -> Result<NodeResult> {
        if !self.config.enable_unsafe_exec {
            warn!(node_type = %NodeType::ExternalScript, "Script execution disabled");
            return Ok(NodeResult::failure(format!(
                "{} node execution is disabled. Set scripts.enable_unsafe_exec = true to allow it.",
                NodeType::ExternalScript
            )));
        }

        let cfg: ExternalScriptConfig = parse_config(NodeType::ExternalScript, config)?;
        let Some(code) = cfg.code else {
            return Ok(NodeResult::failure("javascript node requires 'code'"));
        };

        let payload = json!({
            "input": cfg.input.unwrap_or_else(|| ctx.input.clone()),
            "nodes": ctx.nodes,
            "last_output": ctx.last_output,
        });
        let timeout_secs = self.config.timeout_secs.max(1);
        debug!(binary = %self.config.node_binary, timeout_secs, "Running external script");

        let child = Command::new(&self.config.node_binary)
            .arg("-e")
            .arg(wrap(&code))
            .arg(payload.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(Duration::from_secs(timeout_secs), child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(HyperflowError::Script(format!(
                    "failed to start {}: {}",
                    self.config.node_binary, e
                )))
            }
            Err(_) => {
                warn!(timeout_secs, "External script timed out");
                return Ok(NodeResult::failure(format!(
                    "script timed out after {}s",
                    timeout_secs
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let diagnostic = stderr.trim();
            return Ok(NodeResult::failure(if diagnostic.is_empty() {
                format!("script exited with code {}", code)
            } else {
                diagnostic.to_string()
            }));
        }

        match parse_output(&stdout) {
            Ok(value) => Ok(NodeResult::success(value)),
            Err(message) => {
                let diagnostic = stderr.trim();
                Ok(NodeResult::failure(if diagnostic.is_empty() {
                    message
                } else {
                    format!("{}\n{}", message, diagnostic)
                }))
            }
        }
    }
}

impl NodeExecutor for ExternalScriptNode {
    fn execute<'a>(&'a self, config: Value, ctx: &'a RunContext) -> BoxFuture<'a, Result<NodeResult>> {
        Box::pin(self.run(config, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_embeds_code() {
        let wrapped = wrap("result = data.input.x + 1;");
        assert!(wrapped.contains("result = data.input.x + 1;"));
        assert!(wrapped.contains("JSON.stringify({ output:"));
    }

    #[test]
    fn test_parse_output_uses_last_line() {
        assert_eq!(
            parse_output("debug line\n{\"output\": {\"n\": 1}}\n\n").unwrap(),
            json!({"n": 1})
        );
        assert_eq!(parse_output("{\"output\": null}").unwrap(), Value::Null);
        assert!(parse_output("").is_err());
        assert!(parse_output("not json").is_err());
        assert!(parse_output("[1, 2]").is_err());
        assert!(parse_output("{\"value\": 1}").is_err());
    }

    #[tokio::test]
    async fn test_disabled_never_spawns() {
        let node = ExternalScriptNode::new(ScriptConfig {
            node_binary: "/nonexistent/interpreter".into(),
            ..ScriptConfig::default()
        });
        let result = node
            .run(json!({"code": "result = 1;"}), &RunContext::new(json!({})))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("disabled"));
    }

    #[cfg(unix)]
    mod subprocess {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::PathBuf;

        /// A stand-in interpreter: `$1` is `-e`, `$2` the wrapper, `$3` the payload.
        fn fake_interpreter(dir: &tempfile::TempDir, body: &str) -> PathBuf {
            let path = dir.path().join("fake-node");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn node(binary: PathBuf, timeout_secs: u64) -> ExternalScriptNode {
            ExternalScriptNode::new(ScriptConfig {
                enable_unsafe_exec: true,
                node_binary: binary.to_string_lossy().to_string(),
                timeout_secs,
            })
        }

        fn ctx() -> RunContext {
            let mut ctx = RunContext::new(json!({"q": "run input"}));
            ctx.record("prev", &NodeResult::success(json!(5)));
            ctx
        }

        #[tokio::test]
        async fn test_payload_and_output() {
            let dir = tempfile::tempdir().unwrap();
            let bin = fake_interpreter(
                &dir,
                "echo 'noise before result'\nprintf '{\"output\": %s}\\n' \"$3\"",
            );

            let result = node(bin.clone(), 5)
                .run(json!({"code": "result = 1;"}), &ctx())
                .await
                .unwrap();
            assert!(result.success, "{:?}", result.error);
            assert_eq!(result.output["input"], json!({"q": "run input"}));
            assert_eq!(result.output["last_output"], json!(5));
            assert_eq!(result.output["nodes"]["prev"]["output"], json!(5));

            let result = node(bin, 5)
                .run(json!({"code": "result = 1;", "input": {"override": true}}), &ctx())
                .await
                .unwrap();
            assert_eq!(result.output["input"], json!({"override": true}));
        }

        #[tokio::test]
        async fn test_nonzero_exit_carries_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let bin = fake_interpreter(&dir, "echo 'ReferenceError: x is not defined' >&2\nexit 3");
            let result = node(bin, 5)
                .run(json!({"code": "x"}), &ctx())
                .await
                .unwrap();
            assert!(!result.success);
            assert_eq!(result.error.as_deref(), Some("ReferenceError: x is not defined"));
        }

        #[tokio::test]
        async fn test_malformed_output_is_failure() {
            let dir = tempfile::tempdir().unwrap();
            let bin = fake_interpreter(&dir, "echo 'hello'");
            let result = node(bin, 5)
                .run(json!({"code": "console.log('hello')"}), &ctx())
                .await
                .unwrap();
            assert!(!result.success);
            assert!(result.error.unwrap().contains("malformed"));
        }

        #[tokio::test]
        async fn test_timeout_kills_child() {
            let dir = tempfile::tempdir().unwrap();
            let bin = fake_interpreter(&dir, "sleep 10");
            let result = node(bin, 1)
                .run(json!({"code": "while (true) {}"}), &ctx())
                .await
                .unwrap();
            assert!(!result.success);
            assert!(result.error.unwrap().contains("timed out"));
        }

        #[tokio::test]
        async fn test_missing_code_and_binary() {
            let dir = tempfile::tempdir().unwrap();
            let result = node(dir.path().join("nope"), 5)
                .run(json!({}), &ctx())
                .await
                .unwrap();
            assert!(result.error.unwrap().contains("requires 'code'"));

            let err = node(dir.path().join("nope"), 5)
                .run(json!({"code": "1"}), &ctx())
                .await
                .unwrap_err();
            assert!(matches!(err, HyperflowError::Script(_)));
        }
    }
}
