//! Onion-style middleware around tool dispatch.
//!
//! A middleware receives the shared call context and a [`Next`] cursor into
//! the remainder of the chain. Calling `next.run(ctx)` advances; returning
//! without doing so short-circuits the chain and the final handler never
//! runs. All middleware and the final handler observe the same context
//! object, so in-place mutation is visible downstream.

mod cache;
mod filter;
mod transform;

pub use cache::{CacheMiddleware, CacheOptions, canonical_cache_key};
pub use filter::{FilterMiddleware, FilterOptions};
pub use transform::{AfterHook, BeforeHook, TransformMiddleware};

use crate::error::Result;
use async_trait::async_trait;
use rmcp::model::CallToolResult;
use serde_json::Value;
use std::sync::Arc;

/// The call context threaded through the chain.
#[derive(Debug, Clone)]
pub struct MiddlewareContext {
    pub tool_name: String,
    pub arguments: Value,
    /// Backend the router resolved for this call.
    pub server: String,
}

/// One link in the chain.
#[async_trait]
pub trait GatewayMiddleware: Send + Sync {
    async fn handle(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> Result<CallToolResult>;
}

/// The innermost handler, run when the chain is exhausted.
#[async_trait]
pub trait ToolCallHandler: Send + Sync {
    async fn call(&self, ctx: &MiddlewareContext) -> Result<CallToolResult>;
}

/// Cursor over the remaining chain.
pub struct Next<'a> {
    chain: &'a [Arc<dyn GatewayMiddleware>],
    handler: &'a dyn ToolCallHandler,
}

impl Next<'_> {
    /// Run the rest of the chain, ending in the final handler.
    pub async fn run(self, ctx: &mut MiddlewareContext) -> Result<CallToolResult> {
        match self.chain.split_first() {
            Some((middleware, rest)) => {
                middleware
                    .handle(
                        ctx,
                        Next {
                            chain: rest,
                            handler: self.handler,
                        },
                    )
                    .await
            }
            None => self.handler.call(ctx).await,
        }
    }
}

/// Execute `middleware` in index order around `handler`.
pub async fn execute_middleware_chain(
    middleware: &[Arc<dyn GatewayMiddleware>],
    ctx: &mut MiddlewareContext,
    handler: &dyn ToolCallHandler,
) -> Result<CallToolResult> {
    Next {
        chain: middleware,
        handler,
    }
    .run(ctx)
    .await
}
