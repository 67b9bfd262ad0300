//! Request/response rewriting hooks.

use super::{GatewayMiddleware, MiddlewareContext, Next};
use crate::error::Result;
use async_trait::async_trait;
use rmcp::model::CallToolResult;
use std::sync::Arc;

/// Mutates the context before the rest of the chain runs.
pub type BeforeHook = Arc<dyn Fn(&mut MiddlewareContext) + Send + Sync>;
/// Rewrites the result on the way back out.
pub type AfterHook = Arc<dyn Fn(&mut CallToolResult) + Send + Sync>;

#[derive(Default)]
pub struct TransformMiddleware {
    before: Option<BeforeHook>,
    after: Option<AfterHook>,
}

impl TransformMiddleware {
    pub fn new(before: Option<BeforeHook>, after: Option<AfterHook>) -> Self {
        Self { before, after }
    }

    pub fn before(hook: impl Fn(&mut MiddlewareContext) + Send + Sync + 'static) -> Self {
        Self {
            before: Some(Arc::new(hook)),
            after: None,
        }
    }

    pub fn after(hook: impl Fn(&mut CallToolResult) + Send + Sync + 'static) -> Self {
        Self {
            before: None,
            after: Some(Arc::new(hook)),
        }
    }
}

#[async_trait]
impl GatewayMiddleware for TransformMiddleware {
    async fn handle(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> Result<CallToolResult> {
        if let Some(before) = &self.before {
            before(ctx);
        }
        let mut result = next.run(ctx).await?;
        if let Some(after) = &self.after {
            after(&mut result);
        }
        Ok(result)
    }
}
