//! Function-level instrumentation.
//!
//! An alternative to transport interception for hosts that register tool
//! handlers directly: wrap the handler once, and every invocation is
//! sampled, optionally traced, and recorded.

use crate::collector::AnalyticsCollector;
use crate::event::ToolCallEvent;
use futures::FutureExt;
use futures::future::BoxFuture;
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Options for [`wrap_tool_handler`].
#[derive(Debug, Clone)]
pub struct WrapOptions {
    /// Probability in `[0, 1]` that a call is recorded.
    pub sample_rate: f64,
    /// Run the handler inside a `tracing` span so downstream traced calls
    /// become children.
    pub tracing: bool,
}

impl Default for WrapOptions {
    fn default() -> Self {
        Self {
            sample_rate: 1.0,
            tracing: false,
        }
    }
}

/// The shape of a wrapped handler: MCP arguments in, MCP result value out.
pub type WrappedHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Wrap a per-tool handler so each call is recorded as a [`ToolCallEvent`]
/// (without a session id).
///
/// Unsampled calls go straight through. Failures are recorded with the
/// error message and re-raised; results carrying `isError: true` are
/// recorded as failures too.
pub fn wrap_tool_handler<F, Fut>(
    tool_name: impl Into<String>,
    collector: Arc<AnalyticsCollector>,
    options: WrapOptions,
    handler: F,
) -> WrappedHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    let tool_name = tool_name.into();
    let handler = Arc::new(handler);

    Arc::new(move |arguments: Value| {
        let tool_name = tool_name.clone();
        let collector = collector.clone();
        let options = options.clone();
        let handler = handler.clone();

        async move {
            let rate = options.sample_rate.clamp(0.0, 1.0);
            if !(rand::thread_rng().r#gen::<f64>() < rate) {
                return handler(arguments).await;
            }

            let input_size = arguments.to_string().len() as u64;
            let started = Instant::now();

            let span = options
                .tracing
                .then(|| tracing::info_span!("mcp.tool_call", tool = %tool_name));
            let invocation = handler(arguments);
            let result = match &span {
                Some(span) => invocation.instrument(span.clone()).await,
                None => invocation.await,
            };

            let duration_ms = started.elapsed().as_millis() as u64;
            let mut event = ToolCallEvent {
                tool_name,
                session_id: None,
                timestamp: ToolCallEvent::now_ms(),
                duration_ms,
                success: true,
                error_message: None,
                error_code: None,
                input_size,
                output_size: 0,
                metadata: Default::default(),
            };

            match result {
                Ok(value) => {
                    event.output_size = value.to_string().len() as u64;
                    if value.get("isError").and_then(Value::as_bool) == Some(true) {
                        event.success = false;
                        event.error_message = first_text_content(&value);
                    }
                    collector.record(event);
                    Ok(value)
                }
                Err(e) => {
                    event.success = false;
                    event.error_message = Some(e.to_string());
                    if let Some(span) = &span {
                        span.in_scope(|| tracing::error!(error = %e, "tool handler failed"));
                    }
                    collector.record(event);
                    Err(e)
                }
            }
        }
        .boxed()
    })
}

fn first_text_content(result: &Value) -> Option<String> {
    result
        .get("content")?
        .as_array()?
        .first()?
        .get("text")?
        .as_str()
        .map(str::to_string)
}
