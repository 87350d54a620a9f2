use std::path::{Component, Path, PathBuf};

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use walkdir::WalkDir;

use hyperflow_core::error::{HyperflowError, Result};

use crate::registry::{Tool, ToolContext};

const TOOL_NAME: &str = "filesystem";

/// Read, write, and list files inside the project workspace.
pub struct FileSystemTool;

#[derive(Deserialize)]
struct FileSystemInput {
    #[serde(default = "default_action")]
    action: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    content: Option<serde_json::Value>,
    #[serde(default = "default_depth")]
    depth: usize,
}

fn default_action() -> String {
    "list".to_string()
}

fn default_depth() -> usize {
    2
}

fn exec_err(message: impl Into<String>) -> HyperflowError {
    HyperflowError::ToolExecution {
        tool: TOOL_NAME.into(),
        message: message.into(),
    }
}

/// Join a relative path onto the workspace, refusing anything that could
/// leave it.
fn resolve(workspace: &Path, relative: &str) -> Result<PathBuf> {
    let rel = Path::new(relative);
    for component in rel.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(HyperflowError::ToolValidation(
                    "Access outside project workspace is not allowed".into(),
                ))
            }
        }
    }
    Ok(workspace.join(rel))
}

fn display_relative(workspace: &Path, target: &Path) -> String {
    target
        .strip_prefix(workspace)
        .unwrap_or(target)
        .to_string_lossy()
        .to_string()
}

fn content_string(content: Option<serde_json::Value>, action: &str) -> Result<String> {
    match content {
        Some(serde_json::Value::String(s)) => Ok(s),
        Some(other) => Ok(other.to_string()),
        None => Err(HyperflowError::ToolValidation(format!(
            "'content' required for {}",
            action
        ))),
    }
}

fn list_entries(workspace: &Path, depth: usize) -> Result<serde_json::Value> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(workspace)
        .min_depth(1)
        .max_depth(depth.max(1))
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| exec_err(e.to_string()))?;
        let is_dir = entry.file_type().is_dir();
        let size = if is_dir {
            None
        } else {
            entry.metadata().ok().map(|m| m.len())
        };
        entries.push(json!({
            "path": display_relative(workspace, entry.path()),
            "isDir": is_dir,
            "size": size,
        }));
    }
    Ok(serde_json::Value::Array(entries))
}

impl Tool for FileSystemTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Read, write, and list files within the project sandbox."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["list", "read", "write", "append", "delete", "mkdir"],
                    "description": "Operation to perform (default: list)"
                },
                "path": { "type": "string", "description": "Path relative to the project workspace" },
                "content": { "type": "string", "description": "Text for write/append" },
                "depth": { "type": "integer", "description": "Directory depth for list (default: 2)" }
            }
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let params: FileSystemInput = serde_json::from_value(input)
                .map_err(|e| HyperflowError::ToolValidation(e.to_string()))?;
            let action = params.action.to_lowercase();
            let workspace = ctx.workspace;

            tokio::fs::create_dir_all(&workspace)
                .await
                .map_err(|e| exec_err(format!("{}: {}", workspace.display(), e)))?;
            debug!(action = %action, workspace = %workspace.display(), "Filesystem tool");

            if action == "list" {
                let root = workspace.clone();
                let depth = params.depth;
                return tokio::task::spawn_blocking(move || list_entries(&root, depth))
                    .await
                    .map_err(|e| exec_err(e.to_string()))?;
            }

            if !matches!(action.as_str(), "read" | "write" | "append" | "delete" | "mkdir") {
                return Err(HyperflowError::ToolValidation(format!(
                    "Unsupported action '{}'",
                    action
                )));
            }

            let relative = params
                .path
                .filter(|p| !p.trim().is_empty())
                .ok_or_else(|| HyperflowError::ToolValidation("'path' argument required".into()))?;
            let target = resolve(&workspace, &relative)?;
            let shown = display_relative(&workspace, &target);

            match action.as_str() {
                "read" => {
                    let text = tokio::fs::read_to_string(&target)
                        .await
                        .map_err(|e| exec_err(format!("{}: {}", shown, e)))?;
                    Ok(serde_json::Value::String(text))
                }
                "write" | "append" => {
                    let content = content_string(params.content, &action)?;
                    if let Some(parent) = target.parent() {
                        tokio::fs::create_dir_all(parent)
                            .await
                            .map_err(|e| exec_err(e.to_string()))?;
                    }
                    if action == "append" {
                        use tokio::io::AsyncWriteExt;
                        let mut file = tokio::fs::OpenOptions::new()
                            .create(true)
                            .append(true)
                            .open(&target)
                            .await
                            .map_err(|e| exec_err(format!("{}: {}", shown, e)))?;
                        file.write_all(content.as_bytes())
                            .await
                            .map_err(|e| exec_err(e.to_string()))?;
                    } else {
                        tokio::fs::write(&target, content.as_bytes())
                            .await
                            .map_err(|e| exec_err(format!("{}: {}", shown, e)))?;
                    }
                    Ok(json!({ "path": shown }))
                }
                "delete" => {
                    if target == workspace {
                        return Err(HyperflowError::ToolValidation(
                            "refusing to delete the project workspace".into(),
                        ));
                    }
                    let meta = tokio::fs::metadata(&target)
                        .await
                        .map_err(|e| exec_err(format!("{}: {}", shown, e)))?;
                    let removed = if meta.is_dir() {
                        tokio::fs::remove_dir_all(&target).await
                    } else {
                        tokio::fs::remove_file(&target).await
                    };
                    removed.map_err(|e| exec_err(e.to_string()))?;
                    Ok(json!({ "deleted": shown }))
                }
                _ => {
                    tokio::fs::create_dir_all(&target)
                        .await
                        .map_err(|e| exec_err(e.to_string()))?;
                    Ok(json!({ "directory": shown }))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(dir: &tempfile::TempDir) -> ToolContext {
        ToolContext {
            project_id: 1,
            project_name: "demo".into(),
            workspace: dir.path().join("projects").join("demo"),
        }
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let out = FileSystemTool
            .execute(
                json!({"action": "write", "path": "notes/a.txt", "content": "hello"}),
                ctx(&dir),
            )
            .await
            .unwrap();
        assert_eq!(out["path"], "notes/a.txt");

        let text = FileSystemTool
            .execute(json!({"action": "read", "path": "notes/a.txt"}), ctx(&dir))
            .await
            .unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn test_append() {
        let dir = tempfile::tempdir().unwrap();
        for chunk in ["a", "b"] {
            FileSystemTool
                .execute(
                    json!({"action": "append", "path": "log.txt", "content": chunk}),
                    ctx(&dir),
                )
                .await
                .unwrap();
        }
        let text = FileSystemTool
            .execute(json!({"action": "read", "path": "log.txt"}), ctx(&dir))
            .await
            .unwrap();
        assert_eq!(text, "ab");
    }

    #[tokio::test]
    async fn test_list_is_default_action() {
        let dir = tempfile::tempdir().unwrap();
        FileSystemTool
            .execute(json!({"action": "mkdir", "path": "sub"}), ctx(&dir))
            .await
            .unwrap();
        FileSystemTool
            .execute(json!({"action": "write", "path": "x.txt", "content": "1234"}), ctx(&dir))
            .await
            .unwrap();

        let listing = FileSystemTool.execute(json!({}), ctx(&dir)).await.unwrap();
        let entries = listing.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["path"], "sub");
        assert_eq!(entries[0]["isDir"], true);
        assert_eq!(entries[1]["size"], 4);
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for path in ["../escape.txt", "/etc/passwd", "a/../../b"] {
            let err = FileSystemTool
                .execute(json!({"action": "read", "path": path}), ctx(&dir))
                .await
                .unwrap_err();
            assert!(matches!(err, HyperflowError::ToolValidation(_)), "{}", path);
        }
    }

    #[tokio::test]
    async fn test_missing_path_and_content() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileSystemTool
            .execute(json!({"action": "read"}), ctx(&dir))
            .await
            .is_err());
        assert!(FileSystemTool
            .execute(json!({"action": "write", "path": "a"}), ctx(&dir))
            .await
            .is_err());
        assert!(FileSystemTool
            .execute(json!({"action": "chmod", "path": "a"}), ctx(&dir))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        FileSystemTool
            .execute(json!({"action": "write", "path": "d/f.txt", "content": "x"}), ctx(&dir))
            .await
            .unwrap();
        let out = FileSystemTool
            .execute(json!({"action": "delete", "path": "d"}), ctx(&dir))
            .await
            .unwrap();
        assert_eq!(out["deleted"], "d");
        assert!(!dir.path().join("projects/demo/d").exists());
    }
}
