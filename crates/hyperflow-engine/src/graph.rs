use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use hyperflow_core::error::{HyperflowError, Result};

/// Kind of work a node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Llm,
    Tool,
    Http,
    Wait,
    /// In-process sandboxed script, declared as `python` in graph files.
    #[serde(rename = "python")]
    EmbeddedScript,
    /// Script run by an external interpreter, declared as `javascript`.
    #[serde(rename = "javascript")]
    ExternalScript,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Tool => "tool",
            Self::Http => "http",
            Self::Wait => "wait",
            Self::EmbeddedScript => "python",
            Self::ExternalScript => "javascript",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Free-form settings; string leaves may hold `{{path}}` templates.
    #[serde(default = "empty_config")]
    pub config: serde_json::Value,
}

fn empty_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: NodeType, config: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            node_type,
            config,
        }
    }
}

/// A directed link from one node to a candidate successor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(alias = "from")]
    pub source: String,
    #[serde(alias = "to")]
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Nodes, edges, and an optional entrypoint.
///
/// Traversal is single-path: only the first edge declared for a source is
/// ever followed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowGraph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
}

/// A problem found by [`WorkflowGraph::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphIssue {
    Empty,
    DuplicateId(String),
    UnknownEntrypoint(String),
    UnknownEdgeNode {
        index: usize,
        node_id: String,
    },
    /// Never followed because an earlier edge shares its source.
    InertEdge {
        index: usize,
        source: String,
        target: String,
    },
}

impl GraphIssue {
    /// Errors make `run()` fail or stop early; the rest are warnings.
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::InertEdge { .. })
    }
}

impl fmt::Display for GraphIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "graph has no nodes"),
            Self::DuplicateId(id) => write!(f, "duplicate node id '{}'", id),
            Self::UnknownEntrypoint(id) => write!(f, "entrypoint '{}' is not a declared node", id),
            Self::UnknownEdgeNode { index, node_id } => {
                write!(f, "edge #{} references unknown node '{}'", index, node_id)
            }
            Self::InertEdge {
                index,
                source,
                target,
            } => write!(
                f,
                "edge #{} ({} -> {}) is never followed; '{}' already has an earlier edge",
                index, source, target, source
            ),
        }
    }
}

impl WorkflowGraph {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| HyperflowError::InvalidGraph(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Explicit entrypoint, else the first declared node.
    pub fn entry_id(&self) -> Option<&str> {
        self.entrypoint
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .or_else(|| self.nodes.first().map(|n| n.id.as_str()))
    }

    /// Target of the first edge declared for `source`.
    pub fn next_after(&self, source: &str) -> Option<&str> {
        self.edges
            .iter()
            .find(|e| e.source == source)
            .map(|e| e.target.as_str())
    }

    pub fn validate(&self) -> Vec<GraphIssue> {
        let mut issues = Vec::new();

        if self.nodes.is_empty() {
            issues.push(GraphIssue::Empty);
        }

        let mut ids: HashSet<&str> = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                issues.push(GraphIssue::DuplicateId(node.id.clone()));
            }
        }

        if let Some(entry) = self.entry_id() {
            if !ids.contains(entry) {
                issues.push(GraphIssue::UnknownEntrypoint(entry.to_string()));
            }
        }

        let mut seen_sources: HashSet<&str> = HashSet::new();
        for (index, edge) in self.edges.iter().enumerate() {
            for node_id in [&edge.source, &edge.target] {
                if !ids.contains(node_id.as_str()) {
                    issues.push(GraphIssue::UnknownEdgeNode {
                        index,
                        node_id: node_id.clone(),
                    });
                }
            }
            if !seen_sources.insert(edge.source.as_str()) {
                issues.push(GraphIssue::InertEdge {
                    index,
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                });
            }
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_graph_json() {
        let graph = WorkflowGraph::from_json(
            r#"{
                "nodes": [
                    {"id": "a", "type": "http", "config": {"url": "http://x"}},
                    {"id": "b", "type": "python"},
                    {"id": "c", "type": "javascript", "config": {}}
                ],
                "edges": [{"source": "a", "target": "b"}, {"from": "b", "to": "c"}]
            }"#,
        )
        .unwrap();

        assert_eq!(graph.nodes[1].node_type, NodeType::EmbeddedScript);
        assert_eq!(graph.nodes[1].config, json!({}));
        assert_eq!(graph.nodes[2].node_type, NodeType::ExternalScript);
        assert_eq!(graph.edges[1], Edge::new("b", "c"));
        assert_eq!(graph.entry_id(), Some("a"));
    }

    #[test]
    fn test_unknown_node_type_rejected() {
        let err = WorkflowGraph::from_json(r#"{"nodes": [{"id": "a", "type": "ruby"}]}"#)
            .unwrap_err();
        assert!(matches!(err, HyperflowError::InvalidGraph(_)));
    }

    #[test]
    fn test_explicit_entrypoint() {
        let mut graph = WorkflowGraph {
            nodes: vec![
                Node::new("a", NodeType::Wait, json!({})),
                Node::new("b", NodeType::Wait, json!({})),
            ],
            ..Default::default()
        };
        graph.entrypoint = Some("b".into());
        assert_eq!(graph.entry_id(), Some("b"));

        graph.entrypoint = Some("  ".into());
        assert_eq!(graph.entry_id(), Some("a"));
    }

    #[test]
    fn test_next_after_takes_first_edge() {
        let graph = WorkflowGraph {
            nodes: vec![],
            edges: vec![Edge::new("a", "b"), Edge::new("a", "c"), Edge::new("b", "c")],
            entrypoint: None,
        };
        assert_eq!(graph.next_after("a"), Some("b"));
        assert_eq!(graph.next_after("c"), None);
    }

    #[test]
    fn test_validate_reports_problems() {
        let graph = WorkflowGraph {
            nodes: vec![
                Node::new("a", NodeType::Wait, json!({})),
                Node::new("a", NodeType::Wait, json!({})),
                Node::new("b", NodeType::Wait, json!({})),
            ],
            edges: vec![Edge::new("a", "b"), Edge::new("a", "ghost")],
            entrypoint: Some("zzz".into()),
        };

        let issues = graph.validate();
        assert!(issues.contains(&GraphIssue::DuplicateId("a".into())));
        assert!(issues.contains(&GraphIssue::UnknownEntrypoint("zzz".into())));
        assert!(issues.contains(&GraphIssue::UnknownEdgeNode {
            index: 1,
            node_id: "ghost".into()
        }));
        let inert = issues
            .iter()
            .find(|i| matches!(i, GraphIssue::InertEdge { .. }))
            .unwrap();
        assert!(!inert.is_error());
        assert!(inert.to_string().contains("never followed"));
    }

    #[test]
    fn test_validate_clean_graph() {
        let graph = WorkflowGraph {
            nodes: vec![
                Node::new("a", NodeType::Llm, json!({})),
                Node::new("b", NodeType::Tool, json!({})),
            ],
            edges: vec![Edge::new("a", "b")],
            entrypoint: None,
        };
        assert!(graph.validate().is_empty());
        assert_eq!(WorkflowGraph::default().validate(), vec![GraphIssue::Empty]);
    }
}
