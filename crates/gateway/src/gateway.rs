//! Gateway core: backends, router, middleware and the aggregated tool index.

use crate::aggregator::aggregate_tools;
use crate::backend::{BackendClient, ToolInfo, backend_from_config};
use crate::config::{BackendConfig, GatewayConfig, MiddlewareConfig};
use crate::error::Result;
use crate::middleware::{
    CacheMiddleware, CacheOptions, FilterMiddleware, FilterOptions, GatewayMiddleware,
    MiddlewareContext, ToolCallHandler, execute_middleware_chain,
};
use crate::router::Router;
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use rmcp::model::{CallToolResult, Content};
use serde_json::Value;
use std::sync::Arc;

/// Operational snapshot of one backend.
#[derive(Debug, Clone)]
pub struct BackendSnapshot {
    pub name: String,
    pub config: BackendConfig,
    /// This backend's share of the aggregated tool index.
    pub tools: Vec<String>,
    pub connected: bool,
}

/// The aggregating gateway.
///
/// Construction wires everything but touches no backend; `connect` brings
/// the upstreams online and builds the tool index.
pub struct Gateway {
    config: GatewayConfig,
    router: Router,
    backends: IndexMap<String, Arc<dyn BackendClient>>,
    middleware: Vec<Arc<dyn GatewayMiddleware>>,
    tool_index: RwLock<IndexMap<String, ToolInfo>>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Result<Arc<Self>> {
        Self::with_middleware(config, Vec::new())
    }

    /// Like [`Gateway::new`], with extra programmatic middleware appended
    /// after the config-declared chain.
    pub fn with_middleware(
        config: GatewayConfig,
        extra: Vec<Arc<dyn GatewayMiddleware>>,
    ) -> Result<Arc<Self>> {
        let backends = config
            .servers
            .iter()
            .map(|(name, backend)| (name.clone(), backend_from_config(name, backend)))
            .collect();
        Self::assemble(config, backends, extra)
    }

    /// Construction with injected backend clients. Used by tests and
    /// embedders that bring their own transport.
    pub fn with_backends(
        config: GatewayConfig,
        backends: Vec<Arc<dyn BackendClient>>,
        extra_middleware: Vec<Arc<dyn GatewayMiddleware>>,
    ) -> Result<Arc<Self>> {
        let backends = backends
            .into_iter()
            .map(|backend| (backend.name().to_string(), backend))
            .collect();
        Self::assemble(config, backends, extra_middleware)
    }

    fn assemble(
        config: GatewayConfig,
        backends: IndexMap<String, Arc<dyn BackendClient>>,
        extra_middleware: Vec<Arc<dyn GatewayMiddleware>>,
    ) -> Result<Arc<Self>> {
        for rule in &config.routing {
            if !backends.contains_key(&rule.server) {
                return Err(crate::error::GatewayError::Config(format!(
                    "routing rule '{}' references unknown backend '{}'",
                    rule.pattern, rule.server
                )));
            }
        }
        let router = Router::new(&config.routing)?;

        let mut middleware: Vec<Arc<dyn GatewayMiddleware>> = Vec::new();
        for entry in &config.middleware {
            middleware.push(build_middleware(entry)?);
        }
        middleware.extend(extra_middleware);

        Ok(Arc::new(Self {
            config,
            router,
            backends,
            middleware,
            tool_index: RwLock::new(IndexMap::new()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Connect every backend, then build the tool index. Any backend
    /// failure fails the whole call.
    pub async fn connect(&self) -> Result<()> {
        futures::future::try_join_all(
            self.backends.values().map(|backend| backend.connect()),
        )
        .await?;
        tracing::info!(backends = self.backends.len(), "all backends connected");
        self.refresh_tool_index().await
    }

    /// Re-fetch every backend's tools and atomically replace the index.
    pub async fn refresh_tool_index(&self) -> Result<()> {
        let per_backend =
            futures::future::try_join_all(self.backends.iter().map(|(name, backend)| async move {
                Ok::<_, crate::error::GatewayError>((name.clone(), backend.list_tools().await?))
            }))
            .await?;

        let merged = aggregate_tools(per_backend);
        let index: IndexMap<String, ToolInfo> = merged
            .into_iter()
            .map(|tool| (tool.name.clone(), tool))
            .collect();

        tracing::info!(tools = index.len(), "tool index refreshed");
        *self.tool_index.write() = index;
        Ok(())
    }

    /// Dispatch one tool call through routing and the middleware chain.
    ///
    /// Failures never escape as errors: every one becomes a structured MCP
    /// result with `isError: true`.
    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> CallToolResult {
        let Some(server) = self.router.resolve(tool_name) else {
            tracing::debug!(tool = %tool_name, "no routing rule matches");
            return error_result("No routing rule matches".to_string());
        };

        let Some(backend) = self.backends.get(server) else {
            tracing::warn!(tool = %tool_name, server = %server, "rule points at unknown backend");
            return error_result("Backend not found".to_string());
        };

        let mut ctx = MiddlewareContext {
            tool_name: tool_name.to_string(),
            arguments,
            server: server.to_string(),
        };
        let dispatch = BackendDispatch {
            backend: backend.as_ref(),
        };

        match execute_middleware_chain(&self.middleware, &mut ctx, &dispatch).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(tool = %tool_name, server = %server, error = %e, "tool call failed");
                error_result(format!("Backend error: {e}"))
            }
        }
    }

    /// Snapshot of the aggregated index, in aggregation order.
    pub fn tools(&self) -> Vec<ToolInfo> {
        self.tool_index.read().values().cloned().collect()
    }

    pub fn find_tool(&self, name: &str) -> Option<ToolInfo> {
        self.tool_index.read().get(name).cloned()
    }

    /// Per-backend operational view.
    pub fn backends(&self) -> Vec<BackendSnapshot> {
        let index = self.tool_index.read();
        self.backends
            .iter()
            .map(|(name, backend)| BackendSnapshot {
                name: name.clone(),
                config: backend.config().clone(),
                tools: index
                    .values()
                    .filter(|tool| &tool.backend == name)
                    .map(|tool| tool.name.clone())
                    .collect(),
                connected: backend.connected(),
            })
            .collect()
    }

    /// Close every backend (errors tolerated) and clear the tool index.
    pub async fn close(&self) {
        let results = futures::future::join_all(
            self.backends
                .iter()
                .map(|(name, backend)| async move { (name, backend.close().await) }),
        )
        .await;
        for (name, result) in results {
            if let Err(e) = result {
                tracing::warn!(backend = %name, error = %e, "error closing backend");
            }
        }
        self.tool_index.write().clear();
    }
}

struct BackendDispatch<'a> {
    backend: &'a dyn BackendClient,
}

#[async_trait]
impl ToolCallHandler for BackendDispatch<'_> {
    async fn call(&self, ctx: &MiddlewareContext) -> Result<CallToolResult> {
        self.backend
            .call_tool(&ctx.tool_name, ctx.arguments.clone())
            .await
    }
}

fn build_middleware(entry: &MiddlewareConfig) -> Result<Arc<dyn GatewayMiddleware>> {
    Ok(match entry {
        MiddlewareConfig::Filter { allow, deny } => Arc::new(FilterMiddleware::new(FilterOptions {
            allow: allow.clone(),
            deny: deny.clone(),
        })?),
        MiddlewareConfig::Cache { ttl, max_size } => Arc::new(CacheMiddleware::new(CacheOptions {
            ttl_secs: *ttl,
            max_size: *max_size,
            store: None,
        })),
    })
}

fn error_result(text: String) -> CallToolResult {
    CallToolResult::error(vec![Content::text(text)])
}
