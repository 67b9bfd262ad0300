//! Aggregating MCP gateway.
//!
//! One streamable HTTP MCP endpoint fronting many upstream MCP backends
//! (HTTP or stdio child processes). Tool calls are routed by name pattern,
//! pass through an ordered middleware chain (filter, cache, transform,
//! custom), and are dispatched to the owning backend. All failures surface
//! to clients as structured MCP error results, never as raw errors.

pub mod aggregator;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod glob;
pub mod listener;
pub mod mcp_server;
pub mod middleware;
pub mod router;

pub use backend::{
    BackendClient, HttpBackendClient, StdioBackendClient, ToolInfo, backend_from_config,
};
pub use cache::{CacheStore, DEFAULT_CACHE_MAX_SIZE, MemoryCacheStore};
pub use config::{BackendConfig, GatewayConfig, MiddlewareConfig, RoutingRule};
pub use error::{GatewayError, Result};
pub use gateway::{BackendSnapshot, Gateway};
pub use glob::GlobPattern;
pub use listener::{MAX_BODY_BYTES, McpListener, SessionRegistry};
pub use mcp_server::{GatewayAnalytics, GatewayMcpServer};
pub use middleware::{
    CacheMiddleware, CacheOptions, FilterMiddleware, FilterOptions, GatewayMiddleware,
    MiddlewareContext, Next, ToolCallHandler, TransformMiddleware, execute_middleware_chain,
};
pub use router::Router;
