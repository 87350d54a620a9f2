use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use hyperflow_core::config::ScriptConfig;
use hyperflow_core::types::ProviderType;
use hyperflow_engine::{NodeExecutors, WorkflowEngine, WorkflowGraph};
use hyperflow_test_utils::{mock_registry, test_rotator, MockProvider, MockToolExecutor};

async fn serve_value() -> String {
    let app = Router::new().route("/value", get(|| async { Json(json!({"value": 42})) }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_http_output_feeds_llm_prompt() {
    let base = serve_value().await;

    let mock = Arc::new(MockProvider::new(ProviderType::OpenAi));
    mock.push_reply("42 echoed");
    let (rotator, _) = test_rotator();
    let key = rotator
        .add_key(ProviderType::OpenAi, "primary", "sk-e2e")
        .await
        .unwrap();

    let engine = WorkflowEngine::new(NodeExecutors::new(
        Arc::new(mock_registry(mock.clone())),
        rotator,
        Arc::new(MockToolExecutor::new()),
        ScriptConfig::default(),
    ));

    let graph = WorkflowGraph::from_json(
        &json!({
            "nodes": [
                {"id": "fetch", "type": "http", "config": {"url": format!("{}/value", base)}},
                {"id": "echo", "type": "llm", "config": {
                    "provider": "openai",
                    "prompt": "Echo {{nodes.fetch.output.value}}"
                }}
            ],
            "edges": [{"source": "fetch", "target": "echo"}]
        })
        .to_string(),
    )
    .unwrap();

    let result = engine.run(&graph, json!({})).await.unwrap();

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.path, vec!["fetch", "echo"]);
    assert_eq!(result.node_results["fetch"].output, json!({"value": 42}));
    assert_eq!(result.node_results["fetch"].status_code, Some(200));

    let calls = mock.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].messages[1].content, "Echo 42");
    assert_eq!(calls[0].secret, "sk-e2e");

    assert_eq!(result.last_output, json!("42 echoed"));
    assert_eq!(result.node_results["echo"].used_key_id, Some(key.id));
}

#[tokio::test]
async fn test_unreachable_endpoint_stops_before_llm() {
    let mock = Arc::new(MockProvider::new(ProviderType::OpenAi));
    let (rotator, _) = test_rotator();
    rotator
        .add_key(ProviderType::OpenAi, "primary", "sk-e2e")
        .await
        .unwrap();

    let engine = WorkflowEngine::new(NodeExecutors::new(
        Arc::new(mock_registry(mock.clone())),
        rotator,
        Arc::new(MockToolExecutor::new()),
        ScriptConfig::default(),
    ));

    let graph = WorkflowGraph::from_json(
        r#"{
            "nodes": [
                {"id": "fetch", "type": "http", "config": {"url": "http://127.0.0.1:1/value", "timeoutSeconds": 2}},
                {"id": "echo", "type": "llm", "config": {"provider": "openai", "prompt": "x"}}
            ],
            "edges": [{"source": "fetch", "target": "echo"}]
        }"#,
    )
    .unwrap();

    let result = engine.run(&graph, json!({})).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.path, vec!["fetch"]);
    assert!(result.error.unwrap().starts_with("HTTP request failed"));
    assert!(mock.calls().is_empty());
}
