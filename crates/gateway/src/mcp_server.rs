//! The MCP server face of the gateway.
//!
//! One instance exists per client session (the listener's service factory
//! creates them lazily). Every tool in the aggregated index is re-exported
//! under its own name; validation of arguments is left to the owning
//! backend.

use crate::gateway::Gateway;
use axum::http::request::Parts;
use conflux_analytics::{AnalyticsCollector, SamplingStrategy, ToolCallEvent};
use parking_lot::Mutex;
use rand::Rng;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult,
        PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo, Tool,
    },
    service::{RequestContext, RoleServer},
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// Analytics wiring shared by all session servers.
#[derive(Clone)]
pub struct GatewayAnalytics {
    pub collector: Arc<AnalyticsCollector>,
    pub sample_rate: f64,
    pub strategy: SamplingStrategy,
}

impl GatewayAnalytics {
    pub fn from_collector(collector: Arc<AnalyticsCollector>) -> Self {
        let config = collector.config().clone();
        Self {
            collector,
            sample_rate: config.effective_sample_rate(),
            strategy: config.sampling_strategy,
        }
    }
}

fn mcp_session_id_from_context(context: &RequestContext<RoleServer>) -> Option<&str> {
    context
        .extensions
        .get::<Parts>()
        .and_then(|parts| parts.headers.get("mcp-session-id"))
        .and_then(|h| h.to_str().ok())
}

/// Permissive re-advertisement of a backend's input schema: declared
/// properties are kept by name but accept any value, nothing is required,
/// and unknown keys pass through. The owning backend stays authoritative
/// for real validation.
fn permissive_schema(schema: &Value) -> serde_json::Map<String, Value> {
    let properties: serde_json::Map<String, Value> = schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .keys()
                .map(|name| (name.clone(), Value::Object(serde_json::Map::new())))
                .collect()
        })
        .unwrap_or_default();

    let mut out = serde_json::Map::new();
    out.insert("type".to_string(), Value::String("object".to_string()));
    out.insert("properties".to_string(), Value::Object(properties));
    out.insert("additionalProperties".to_string(), Value::Bool(true));
    out
}


/// MCP server that forwards every tool call into the gateway core.
#[derive(Clone)]
pub struct GatewayMcpServer {
    gateway: Arc<Gateway>,
    analytics: Option<GatewayAnalytics>,
    /// Cached sampling decision for `per_session` strategy; this server
    /// instance lives exactly as long as its session.
    session_decision: Arc<Mutex<Option<bool>>>,
}

impl GatewayMcpServer {
    pub fn new(gateway: Arc<Gateway>, analytics: Option<GatewayAnalytics>) -> Self {
        Self {
            gateway,
            analytics,
            session_decision: Arc::new(Mutex::new(None)),
        }
    }

    fn should_record(&self, analytics: &GatewayAnalytics) -> bool {
        let rate = analytics.sample_rate;
        match analytics.strategy {
            SamplingStrategy::PerCall => rand::thread_rng().r#gen::<f64>() < rate,
            SamplingStrategy::PerSession => {
                let mut decision = self.session_decision.lock();
                *decision.get_or_insert_with(|| rand::thread_rng().r#gen::<f64>() < rate)
            }
        }
    }

    fn record_call(
        &self,
        session_id: Option<&str>,
        tool_name: &str,
        arguments: &Value,
        result: &CallToolResult,
        started: Instant,
    ) {
        let Some(analytics) = &self.analytics else {
            return;
        };
        if !self.should_record(analytics) {
            return;
        }

        let encoded = serde_json::to_value(result).unwrap_or(Value::Null);
        let success = result.is_error != Some(true);
        let error_message = if success {
            None
        } else {
            encoded
                .get("content")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("text"))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        analytics.collector.record(ToolCallEvent {
            tool_name: tool_name.to_string(),
            session_id: session_id.map(str::to_string),
            timestamp: ToolCallEvent::now_ms(),
            duration_ms: started.elapsed().as_millis() as u64,
            success,
            error_message,
            error_code: None,
            input_size: arguments.to_string().len() as u64,
            output_size: encoded.to_string().len() as u64,
            metadata: Default::default(),
        });
    }
}

impl ServerHandler for GatewayMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: self.gateway.name().to_string(),
                version: self.gateway.version().to_string(),
                ..Default::default()
            },
            instructions: Some(
                "Aggregating MCP gateway: tool calls are routed to upstream backends.".to_string(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let start = Instant::now();
        let tools: Vec<Tool> = self
            .gateway
            .tools()
            .into_iter()
            .map(|info| {
                let schema = Arc::new(permissive_schema(&info.input_schema));
                Tool::new(info.name, info.description.unwrap_or_default(), schema)
            })
            .collect();

        tracing::debug!(
            request_id = %context.id,
            tool_count = tools.len(),
            elapsed = ?start.elapsed(),
            "tools/list"
        );
        Ok(ListToolsResult {
            tools,
            next_cursor: None,
            ..Default::default()
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let session_id = mcp_session_id_from_context(&context);
        let start = Instant::now();
        let tool_name = request.name.to_string();
        let arguments = Value::Object(request.arguments.unwrap_or_default());

        let result = self.gateway.call_tool(&tool_name, arguments.clone()).await;

        tracing::debug!(
            mcp_session_id = session_id.unwrap_or("<none>"),
            request_id = %context.id,
            tool = %tool_name,
            is_error = result.is_error == Some(true),
            elapsed = ?start.elapsed(),
            "tools/call"
        );

        self.record_call(session_id, &tool_name, &arguments, &result, start);
        Ok(result)
    }
}
