//! End-to-end aggregation: several backends behind one registry
//!
//! One backend cannot start, one is remote, one is a local process. The
//! gateway keeps the two that work and still exposes its own status tool.

#![allow(clippy::unwrap_used)]

mod common;

use mcpmux_gateway::config::GatewayConfig;
use mcpmux_gateway::mcp::types::{Content, JsonRpcError, JsonRpcRequest};
use mcpmux_gateway::mcp::SessionTransport;
use mcpmux_gateway::orchestrator::OutcomeStatus;
use mcpmux_gateway::registry::{CapabilityKind, STATUS_NAME};
use mcpmux_gateway::{server, GatewayError, Orchestrator};
use serde_json::{json, Value};

use common::*;

async fn orchestrate() -> mcpmux_gateway::Gateway {
    let base = spawn(fake_backend()).await;
    let backends = vec![
        unspawnable("broken"),
        remote("web", base.join("/mcp").unwrap()),
        local_script("local"),
    ];

    let mut orchestrator = Orchestrator::new(GatewayConfig {
        connect_timeout: CONNECT_TIMEOUT,
        ..Default::default()
    })
    .unwrap();

    let report = orchestrator.connect_all(&backends).await.unwrap();
    assert_eq!(report.configured, 3);
    assert_eq!(report.connected, 2);

    let failed: Vec<_> = report.failed().map(|o| o.backend.as_str()).collect();
    assert_eq!(failed, vec!["broken"]);

    match &report.outcomes[1].status {
        OutcomeStatus::Connected {
            transport,
            tools,
            prompts,
            resources,
            failed,
        } => {
            assert_eq!(*transport, SessionTransport::StreamableHttp);
            assert_eq!(*tools, 3);
            assert_eq!(*prompts, 1);
            assert_eq!(*resources, 2);
            assert!(failed.is_empty());
        }
        other => panic!("web should be connected, got {other:?}"),
    }
    match &report.outcomes[2].status {
        OutcomeStatus::Connected { transport, tools, .. } => {
            assert_eq!(*transport, SessionTransport::Stdio);
            assert_eq!(*tools, 1);
        }
        other => panic!("local should be connected, got {other:?}"),
    }

    orchestrator.into_gateway()
}

#[tokio::test]
async fn test_published_names_are_backend_prefixed() {
    let gateway = orchestrate().await;
    let registry = gateway.registry();

    let mut tools: Vec<String> = registry.list_tools().into_iter().map(|t| t.name).collect();
    tools.sort();
    assert_eq!(
        tools,
        vec!["gateway_status", "local_whoami", "web_echo", "web_fail", "web_inject"]
    );

    let echo = registry
        .list_tools()
        .into_iter()
        .find(|t| t.name == "web_echo")
        .unwrap();
    assert_eq!(echo.description.as_deref(), Some("[web] Echo the given text"));
    assert_eq!(echo.input_schema["required"], json!(["text"]));

    let prompts: Vec<String> = registry.list_prompts().into_iter().map(|p| p.name).collect();
    assert!(prompts.contains(&"web_greet".to_string()));
    assert!(prompts.contains(&STATUS_NAME.to_string()));

    let resources = registry.list_resources();
    assert!(resources
        .iter()
        .any(|r| r.uri == "mem://readme" && r.name == "web_readme"));

    let templates = registry.list_resource_templates();
    assert_eq!(templates.len(), 1);
    assert_eq!(templates[0].uri_template, "mem://notes/{id}");

    assert_eq!(gateway.backends(), vec!["web", "local"]);
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_calls_reach_the_owning_backend() {
    let gateway = orchestrate().await;
    let registry = gateway.registry();

    let result = registry
        .call_tool("web_echo", Some(json!({"text": "hi there"})))
        .await
        .unwrap();
    assert!(!result.is_error());
    assert_eq!(result.content[0].text_body(), Some("hi there"));

    let result = registry.call_tool("local_whoami", None).await.unwrap();
    assert_eq!(result.content[0].text_body(), Some("local"));

    let prompt = registry
        .get_prompt("web_greet", Some(json!({"name": "Ada"})))
        .await
        .unwrap();
    assert_eq!(prompt.messages[0].content.text_body(), Some("Hello, Ada"));

    let read = registry.read_resource("mem://readme").await.unwrap();
    assert_eq!(read.contents[0].text.as_deref(), Some("contents of mem://readme"));

    let read = registry.read_resource("mem://notes/42").await.unwrap();
    assert_eq!(read.contents[0].text.as_deref(), Some("contents of mem://notes/42"));

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_backend_errors_become_error_results() {
    let gateway = orchestrate().await;
    let registry = gateway.registry();

    let result = registry.call_tool("web_fail", None).await.unwrap();
    assert!(result.is_error());
    let text = result.content[0].text_body().unwrap();
    assert!(text.contains("web"));
    assert!(text.contains("tool exploded"));

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_frontend_rejections() {
    let gateway = orchestrate().await;
    let registry = gateway.registry();

    let err = registry
        .call_tool("web_echo", Some(json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidArguments(_)));
    assert_eq!(err.to_json_rpc().code, JsonRpcError::INVALID_PARAMS);

    let err = registry.call_tool("broken_anything", None).await.unwrap_err();
    assert!(matches!(err, GatewayError::UnknownCapability { .. }));

    let err = registry.read_resource("mem://elsewhere").await.unwrap_err();
    assert!(matches!(err, GatewayError::UnknownCapability { .. }));

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_status_tool_reports_every_backend() {
    let gateway = orchestrate().await;
    let registry = gateway.registry();

    let result = registry.call_tool(STATUS_NAME, None).await.unwrap();
    let Content::Text { text, .. } = &result.content[0] else {
        panic!("status should be text");
    };
    let status: Value = serde_json::from_str(text).unwrap();

    assert_eq!(status["configured"], 3);
    assert_eq!(status["connected"], 2);
    assert_eq!(status["outcomes"][0]["backend"], "broken");
    assert_eq!(status["outcomes"][0]["status"], "failed");
    assert!(status["outcomes"][0]["error"]
        .as_str()
        .unwrap()
        .contains("mcpmux-definitely-not-installed"));
    assert_eq!(status["outcomes"][1]["transport"], "streamable_http");

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_forwarded_results_match_backend_wire() {
    let gateway = orchestrate().await;
    let registry = gateway.registry();

    let call = |method: &str, params: Value| {
        let registry = registry.clone();
        let request = JsonRpcRequest::new(1, method, Some(params));
        async move {
            server::handle_message(&registry, request)
                .await
                .unwrap()
                .result
                .unwrap()
        }
    };

    let tool = call(
        "tools/call",
        json!({"name": "web_echo", "arguments": {"text": "same"}}),
    )
    .await;
    assert_eq!(
        tool,
        json!({
            "content": [{
                "type": "text",
                "text": "same",
                "annotations": {"audience": ["user"], "priority": 0.5}
            }],
            "_meta": {"trace": "echo-1"}
        })
    );

    let prompt = call("prompts/get", json!({"name": "web_greet", "arguments": {"name": "Ada"}})).await;
    assert_eq!(prompt["_meta"], json!({"rendered": true}));

    let read = call("resources/read", json!({"uri": "mem://readme"})).await;
    assert_eq!(
        read,
        json!({
            "contents": [{
                "uri": "mem://readme",
                "mimeType": "text/plain",
                "text": "contents of mem://readme",
                "_meta": {"etag": "v1"}
            }]
        })
    );

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_failed_resource_listing_is_reported_with_templates_kept() {
    let base = spawn(backend_failing("resources/list")).await;
    let mut orchestrator = Orchestrator::new(GatewayConfig {
        connect_timeout: CONNECT_TIMEOUT,
        ..Default::default()
    })
    .unwrap();

    let report = orchestrator
        .connect_all(&[remote("flaky", base.join("/mcp").unwrap())])
        .await
        .unwrap();

    match &report.outcomes[0].status {
        OutcomeStatus::Connected {
            tools,
            resources,
            failed,
            ..
        } => {
            assert_eq!(*tools, 3);
            assert_eq!(*resources, 1);
            assert_eq!(failed, &vec![CapabilityKind::Resource]);
        }
        other => panic!("flaky should be connected, got {other:?}"),
    }

    let gateway = orchestrator.into_gateway();
    let templates = gateway.registry().list_resource_templates();
    assert_eq!(templates[0].name, "flaky_note");
    gateway.shutdown().await;
}
