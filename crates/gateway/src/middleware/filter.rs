//! Allow/deny filtering by tool-name glob.

use super::{GatewayMiddleware, MiddlewareContext, Next};
use crate::error::Result;
use crate::glob::{GlobPattern, compile_all};
use async_trait::async_trait;
use rmcp::model::{CallToolResult, Content};

#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    /// When present, a tool must match at least one pattern to pass.
    pub allow: Option<Vec<String>>,
    /// A tool matching any pattern is rejected; deny wins over allow.
    pub deny: Option<Vec<String>>,
}

pub struct FilterMiddleware {
    allow: Option<Vec<GlobPattern>>,
    deny: Vec<GlobPattern>,
}

impl FilterMiddleware {
    pub fn new(options: FilterOptions) -> Result<Self> {
        Ok(Self {
            allow: options.allow.as_deref().map(compile_all).transpose()?,
            deny: options.deny.as_deref().map(compile_all).transpose()?.unwrap_or_default(),
        })
    }

    fn rejection(&self, tool_name: &str) -> Option<String> {
        if self.deny.iter().any(|p| p.matches(tool_name)) {
            return Some(format!("Tool \"{tool_name}\" is denied by filter policy"));
        }
        if let Some(allow) = &self.allow
            && !allow.iter().any(|p| p.matches(tool_name))
        {
            return Some(format!("Tool \"{tool_name}\" is not in the filter allow list"));
        }
        None
    }
}

#[async_trait]
impl GatewayMiddleware for FilterMiddleware {
    async fn handle(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> Result<CallToolResult> {
        if let Some(reason) = self.rejection(&ctx.tool_name) {
            tracing::debug!(tool = %ctx.tool_name, "filter middleware rejected call");
            return Ok(CallToolResult::error(vec![Content::text(reason)]));
        }
        next.run(ctx).await
    }
}
