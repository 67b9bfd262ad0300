//! Gateway core integration: routing, middleware, caching, lifecycle.

use async_trait::async_trait;
use conflux_gateway::{
    BackendClient, BackendConfig, Gateway, GatewayConfig, GatewayError, MiddlewareConfig,
    RoutingRule, ToolInfo, TransformMiddleware,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use rmcp::model::{CallToolResult, Content};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Clone, Copy, PartialEq)]
enum CallMode {
    Succeed,
    ErrorResult,
    Fail,
}

struct MockBackend {
    name: String,
    config: BackendConfig,
    tool_names: Vec<String>,
    calls: Mutex<Vec<(String, Value)>>,
    connected: AtomicBool,
    fail_connect: bool,
    mode: CallMode,
}

impl MockBackend {
    fn build(name: &str, tool_names: &[&str], fail_connect: bool, mode: CallMode) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            config: BackendConfig::Http {
                url: format!("http://127.0.0.1:0/{name}/mcp"),
                headers: HashMap::new(),
            },
            tool_names: tool_names.iter().map(|s| s.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            fail_connect,
            mode,
        })
    }

    fn new(name: &str, tool_names: &[&str]) -> Arc<Self> {
        Self::build(name, tool_names, false, CallMode::Succeed)
    }

    fn with_mode(name: &str, tool_names: &[&str], mode: CallMode) -> Arc<Self> {
        Self::build(name, tool_names, false, mode)
    }

    fn failing_connect(name: &str) -> Arc<Self> {
        Self::build(name, &[], true, CallMode::Succeed)
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl BackendClient for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn connect(&self) -> conflux_gateway::Result<()> {
        if self.fail_connect {
            return Err(GatewayError::Backend(format!(
                "connect to '{}': refused",
                self.name
            )));
        }
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn list_tools(&self) -> conflux_gateway::Result<Vec<ToolInfo>> {
        if !self.connected() {
            return Err(GatewayError::NotConnected(self.name.clone()));
        }
        Ok(self
            .tool_names
            .iter()
            .map(|name| ToolInfo {
                name: name.clone(),
                description: Some(format!("{name} from {}", self.name)),
                input_schema: json!({"type": "object"}),
                backend: self.name.clone(),
            })
            .collect())
    }

    fn invalidate_tool_cache(&self) {}

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> conflux_gateway::Result<CallToolResult> {
        self.calls.lock().push((name.to_string(), arguments));
        match self.mode {
            CallMode::Succeed => Ok(CallToolResult::success(vec![Content::text(format!(
                "{}:{name}",
                self.name
            ))])),
            CallMode::ErrorResult => Ok(CallToolResult::error(vec![Content::text(
                "upstream says no",
            )])),
            CallMode::Fail => Err(GatewayError::Backend("connection reset".to_string())),
        }
    }

    async fn close(&self) -> conflux_gateway::Result<()> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }
}

fn base_config(routing: Vec<(&str, &str)>, middleware: Vec<MiddlewareConfig>) -> GatewayConfig {
    GatewayConfig {
        name: "test-gateway".to_string(),
        version: "0.0.0".to_string(),
        bind: "127.0.0.1:0".to_string(),
        servers: IndexMap::new(),
        routing: routing
            .into_iter()
            .map(|(pattern, server)| RoutingRule {
                pattern: pattern.to_string(),
                server: server.to_string(),
            })
            .collect(),
        middleware,
        analytics: None,
    }
}

fn result_text(result: &CallToolResult) -> String {
    let encoded = serde_json::to_value(result).expect("result encodes");
    encoded["content"][0]["text"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn routing_falls_back_in_rule_order() {
    let a = MockBackend::new("a", &["a_ping"]);
    let b = MockBackend::new("b", &["c_ping"]);
    let gateway = Gateway::with_backends(
        base_config(vec![("a_*", "a"), ("*", "b")], vec![]),
        vec![a.clone(), b.clone()],
        vec![],
    )
    .expect("gateway");
    gateway.connect().await.expect("connect");

    let result = gateway.call_tool("a_ping", json!({})).await;
    assert_eq!(result_text(&result), "a:a_ping");

    let result = gateway.call_tool("c_ping", json!({})).await;
    assert_eq!(result_text(&result), "b:c_ping");

    assert_eq!(a.call_count(), 1);
    assert_eq!(b.call_count(), 1);
}

#[tokio::test]
async fn missing_route_is_an_error_result_not_a_failure() {
    let a = MockBackend::new("a", &[]);
    let gateway = Gateway::with_backends(
        base_config(vec![("fs_*", "a")], vec![]),
        vec![a.clone()],
        vec![],
    )
    .expect("gateway");
    gateway.connect().await.expect("connect");

    let result = gateway.call_tool("web_fetch", json!({})).await;
    assert_eq!(result.is_error, Some(true));
    assert_eq!(result_text(&result), "No routing rule matches");
    assert_eq!(a.call_count(), 0);
}

#[tokio::test]
async fn filter_denies_without_reaching_the_backend() {
    let a = MockBackend::new("a", &["danger_rm"]);
    let gateway = Gateway::with_backends(
        base_config(
            vec![("*", "a")],
            vec![MiddlewareConfig::Filter {
                allow: None,
                deny: Some(vec!["danger*".to_string()]),
            }],
        ),
        vec![a.clone()],
        vec![],
    )
    .expect("gateway");
    gateway.connect().await.expect("connect");

    let result = gateway.call_tool("danger_rm", json!({})).await;
    assert_eq!(result.is_error, Some(true));
    assert_eq!(
        result_text(&result),
        "Tool \"danger_rm\" is denied by filter policy"
    );
    assert_eq!(a.call_count(), 0);

    // Non-matching tools still go through.
    let result = gateway.call_tool("safe_read", json!({})).await;
    assert_ne!(result.is_error, Some(true));
    assert_eq!(a.call_count(), 1);
}

#[tokio::test]
async fn cache_serves_repeat_calls_and_canonicalizes_arguments() {
    let a = MockBackend::new("a", &["lookup"]);
    let gateway = Gateway::with_backends(
        base_config(
            vec![("*", "a")],
            vec![MiddlewareConfig::Cache {
                ttl: 60,
                max_size: None,
            }],
        ),
        vec![a.clone()],
        vec![],
    )
    .expect("gateway");
    gateway.connect().await.expect("connect");

    let first = gateway.call_tool("lookup", json!({"x": 1, "y": 2})).await;
    let second = gateway.call_tool("lookup", json!({"x": 1, "y": 2})).await;
    assert_eq!(result_text(&first), result_text(&second));
    assert_eq!(a.call_count(), 1);

    // Key-permuted arguments hit the same entry.
    gateway.call_tool("lookup", json!({"y": 2, "x": 1})).await;
    assert_eq!(a.call_count(), 1);

    // Different arguments miss.
    gateway.call_tool("lookup", json!({"x": 1, "y": 3})).await;
    assert_eq!(a.call_count(), 2);
}

#[tokio::test]
async fn error_results_are_never_cached() {
    let a = MockBackend::with_mode("a", &["broken"], CallMode::ErrorResult);
    let gateway = Gateway::with_backends(
        base_config(
            vec![("*", "a")],
            vec![MiddlewareConfig::Cache {
                ttl: 60,
                max_size: None,
            }],
        ),
        vec![a.clone()],
        vec![],
    )
    .expect("gateway");
    gateway.connect().await.expect("connect");

    gateway.call_tool("broken", json!({})).await;
    gateway.call_tool("broken", json!({})).await;
    assert_eq!(a.call_count(), 2);
}

#[tokio::test]
async fn backend_failures_become_backend_error_results() {
    let a = MockBackend::with_mode("a", &["flaky"], CallMode::Fail);
    let gateway = Gateway::with_backends(
        base_config(vec![("*", "a")], vec![]),
        vec![a.clone()],
        vec![],
    )
    .expect("gateway");
    gateway.connect().await.expect("connect");

    let result = gateway.call_tool("flaky", json!({})).await;
    assert_eq!(result.is_error, Some(true));
    assert_eq!(result_text(&result), "Backend error: connection reset");
}

#[tokio::test]
async fn transform_middleware_rewrites_context_and_result() {
    let a = MockBackend::new("a", &["echo"]);
    let transform = Arc::new(TransformMiddleware::new(
        Some(Arc::new(|ctx: &mut conflux_gateway::MiddlewareContext| {
            ctx.arguments["stamped"] = json!(true);
        })),
        Some(Arc::new(|result: &mut CallToolResult| {
            result.content = vec![Content::text("post-processed")];
        })),
    ));
    let gateway = Gateway::with_backends(
        base_config(vec![("*", "a")], vec![]),
        vec![a.clone()],
        vec![transform],
    )
    .expect("gateway");
    gateway.connect().await.expect("connect");

    let result = gateway.call_tool("echo", json!({})).await;
    assert_eq!(result_text(&result), "post-processed");

    let calls = a.calls.lock();
    assert_eq!(calls[0].1["stamped"], true);
}

#[tokio::test]
async fn tool_index_deduplicates_first_backend_wins() {
    let a = MockBackend::new("a", &["shared", "only_a"]);
    let b = MockBackend::new("b", &["shared", "only_b"]);
    let gateway = Gateway::with_backends(
        base_config(vec![("*", "a")], vec![]),
        vec![a.clone(), b.clone()],
        vec![],
    )
    .expect("gateway");
    gateway.connect().await.expect("connect");

    let tools = gateway.tools();
    assert_eq!(tools.len(), 3);
    let shared = gateway.find_tool("shared").expect("shared tool");
    assert_eq!(shared.backend, "a");

    let snapshots = gateway.backends();
    let a_snapshot = snapshots.iter().find(|s| s.name == "a").expect("a");
    let b_snapshot = snapshots.iter().find(|s| s.name == "b").expect("b");
    assert!(a_snapshot.connected);
    assert_eq!(a_snapshot.tools, ["shared", "only_a"]);
    assert_eq!(b_snapshot.tools, ["only_b"]);
}

#[tokio::test]
async fn connect_fails_whole_when_any_backend_fails() {
    let good = MockBackend::new("good", &["t"]);
    let bad = MockBackend::failing_connect("bad");
    let gateway = Gateway::with_backends(
        base_config(vec![], vec![]),
        vec![good, bad],
        vec![],
    )
    .expect("gateway");

    let err = gateway.connect().await.expect_err("connect fails");
    assert!(err.to_string().contains("bad"));
}

#[tokio::test]
async fn close_disconnects_backends_and_clears_the_index() {
    let a = MockBackend::new("a", &["t"]);
    let gateway = Gateway::with_backends(
        base_config(vec![("*", "a")], vec![]),
        vec![a.clone()],
        vec![],
    )
    .expect("gateway");
    gateway.connect().await.expect("connect");
    assert_eq!(gateway.tools().len(), 1);

    gateway.close().await;
    assert!(gateway.tools().is_empty());
    assert!(!a.connected());

    // Reconnect restores a consistent index.
    gateway.connect().await.expect("reconnect");
    assert_eq!(gateway.tools().len(), 1);
}

#[tokio::test]
async fn routing_rules_must_reference_injected_backends() {
    let err = Gateway::with_backends(
        base_config(vec![("*", "ghost")], vec![]),
        vec![MockBackend::new("a", &[])],
        vec![],
    )
    .err()
    .expect("construction fails");
    assert!(err.to_string().contains("unknown backend 'ghost'"));
}
