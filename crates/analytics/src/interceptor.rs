//! Transparent transport interception.
//!
//! [`InterceptedTransport`] wraps an [`McpTransport`] and observes
//! `tools/call` request/response pairs by JSON-RPC id, recording one
//! [`ToolCallEvent`] per matched pair. Everything else passes through
//! unchanged: installing `on_message`/`on_close` on the wrapper keeps the
//! interceptor's own hooks on the inner transport and chains the user's
//! handlers behind them.

use crate::collector::AnalyticsCollector;
use crate::config::SamplingStrategy;
use crate::error::Result;
use crate::event::ToolCallEvent;
use crate::message::{JsonRpcMessage, id_key, tool_call_params};
use crate::trace::{SpanOutcome, SpanSlot, Tracer};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

pub type MessageHandler = Arc<dyn Fn(&Value) + Send + Sync>;
pub type CloseHandler = Arc<dyn Fn() + Send + Sync>;

/// Session key used when the transport has no session id yet.
const UNKNOWN_SESSION: &str = "unknown";

const CLOSED_BEFORE_RESPONSE: &str = "Transport closed before tool response";

/// The transport surface the interceptor composes over.
///
/// Concrete MCP transports (streamable HTTP, stdio) are adapted to this
/// interface by the embedding application; the interceptor implements it
/// itself so wrapped and unwrapped transports are interchangeable.
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn send(&self, message: &Value) -> Result<()>;
    async fn close(&self) -> Result<()>;
    fn set_on_message(&self, handler: Option<MessageHandler>);
    fn set_on_close(&self, handler: Option<CloseHandler>);
    fn session_id(&self) -> Option<String>;
}

/// Interception options.
#[derive(Clone)]
pub struct InterceptOptions {
    /// Probability in `[0, 1]` that a call is observed.
    pub sample_rate: f64,
    pub strategy: SamplingStrategy,
    /// When set, a span is started per observed call.
    pub tracer: Option<Arc<dyn Tracer>>,
}

impl Default for InterceptOptions {
    fn default() -> Self {
        Self {
            sample_rate: 1.0,
            strategy: SamplingStrategy::PerCall,
            tracer: None,
        }
    }
}

struct PendingCall {
    tool_name: String,
    started: Instant,
    input_size: u64,
    span: Option<SpanSlot>,
}

/// A wrapped transport feeding a collector.
pub struct InterceptedTransport {
    inner: Arc<dyn McpTransport>,
    collector: Arc<AnalyticsCollector>,
    options: InterceptOptions,
    pending: Mutex<HashMap<String, PendingCall>>,
    session_decisions: Mutex<HashMap<String, bool>>,
    user_on_message: Mutex<Option<MessageHandler>>,
    user_on_close: Mutex<Option<CloseHandler>>,
}

impl InterceptedTransport {
    pub fn new(
        inner: Arc<dyn McpTransport>,
        collector: Arc<AnalyticsCollector>,
        options: InterceptOptions,
    ) -> Arc<Self> {
        let wrapper = Arc::new(Self {
            inner: inner.clone(),
            collector,
            options,
            pending: Mutex::new(HashMap::new()),
            session_decisions: Mutex::new(HashMap::new()),
            user_on_message: Mutex::new(None),
            user_on_close: Mutex::new(None),
        });

        let weak: Weak<Self> = Arc::downgrade(&wrapper);
        inner.set_on_message(Some(Arc::new(move |message: &Value| {
            if let Some(wrapper) = weak.upgrade() {
                wrapper.observe_incoming(message);
            }
        })));

        let weak: Weak<Self> = Arc::downgrade(&wrapper);
        inner.set_on_close(Some(Arc::new(move || {
            if let Some(wrapper) = weak.upgrade() {
                wrapper.handle_transport_closed();
            }
        })));

        wrapper
    }

    fn should_sample(&self) -> bool {
        let rate = self.options.sample_rate.clamp(0.0, 1.0);
        match self.options.strategy {
            SamplingStrategy::PerCall => rand::thread_rng().r#gen::<f64>() < rate,
            SamplingStrategy::PerSession => {
                let key = self
                    .inner
                    .session_id()
                    .unwrap_or_else(|| UNKNOWN_SESSION.to_string());
                let mut decisions = self.session_decisions.lock();
                *decisions
                    .entry(key)
                    .or_insert_with(|| rand::thread_rng().r#gen::<f64>() < rate)
            }
        }
    }

    fn observe_outgoing(&self, message: &Value) {
        let JsonRpcMessage::Request { id, method, params } = JsonRpcMessage::classify(message)
        else {
            return;
        };
        if method != "tools/call" {
            return;
        }
        let Some((tool_name, arguments)) = tool_call_params(params) else {
            return;
        };
        if !self.should_sample() {
            return;
        }

        let input_size = arguments
            .map(|args| args.to_string().len() as u64)
            .unwrap_or(0);

        let span = self.options.tracer.as_ref().map(|tracer| {
            let slot = SpanSlot::new();
            let task_slot = slot.clone();
            let tracer = tracer.clone();
            let name = tool_name.to_string();
            tokio::spawn(async move {
                match tracer.start_span(&name).await {
                    Ok(span) => task_slot.fulfill(span),
                    Err(e) => {
                        tracing::debug!(error = %e, tool = %name, "span init failed");
                        task_slot.abandon();
                    }
                }
            });
            slot
        });

        self.pending.lock().insert(
            id_key(id),
            PendingCall {
                tool_name: tool_name.to_string(),
                started: Instant::now(),
                input_size,
                span,
            },
        );
    }

    fn observe_incoming(&self, message: &Value) {
        match JsonRpcMessage::classify(message) {
            JsonRpcMessage::Response { id, result } => {
                self.complete_call(id, true, result, None, None);
            }
            JsonRpcMessage::Error { id, error } => {
                let error_message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                let error_code = error.get("code").and_then(Value::as_i64);
                self.complete_call(id, false, error, Some(error_message), error_code);
            }
            _ => {}
        }

        let handler = self.user_on_message.lock().clone();
        if let Some(handler) = handler {
            handler(message);
        }
    }

    fn complete_call(
        &self,
        id: &Value,
        success: bool,
        payload: &Value,
        error_message: Option<String>,
        error_code: Option<i64>,
    ) {
        let Some(call) = self.pending.lock().remove(&id_key(id)) else {
            return;
        };

        let duration_ms = call.started.elapsed().as_millis() as u64;
        let output_size = payload.to_string().len() as u64;

        if let Some(span) = &call.span {
            span.close(if success {
                SpanOutcome::ok()
            } else {
                SpanOutcome::failed(error_message.clone().unwrap_or_default())
            });
        }

        self.collector.record(ToolCallEvent {
            tool_name: call.tool_name,
            session_id: self.inner.session_id(),
            timestamp: ToolCallEvent::now_ms(),
            duration_ms,
            success,
            error_message,
            error_code,
            input_size: call.input_size,
            output_size,
            metadata: Default::default(),
        });
    }

    /// Drain every pending call as a failure and clear session state.
    fn handle_transport_closed(&self) {
        self.drain_pending();
        self.session_decisions.lock().clear();

        let handler = self.user_on_close.lock().clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    fn drain_pending(&self) {
        let drained: Vec<PendingCall> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, call)| call).collect()
        };
        let session_id = self.inner.session_id();

        for call in drained {
            if let Some(span) = &call.span {
                span.close(SpanOutcome::failed(CLOSED_BEFORE_RESPONSE));
            }
            self.collector.record(ToolCallEvent {
                tool_name: call.tool_name,
                session_id: session_id.clone(),
                timestamp: ToolCallEvent::now_ms(),
                duration_ms: call.started.elapsed().as_millis() as u64,
                success: false,
                error_message: Some(CLOSED_BEFORE_RESPONSE.to_string()),
                error_code: None,
                input_size: call.input_size,
                output_size: 0,
                metadata: Default::default(),
            });
        }
    }
}

#[async_trait]
impl McpTransport for InterceptedTransport {
    async fn send(&self, message: &Value) -> Result<()> {
        self.observe_outgoing(message);
        self.inner.send(message).await
    }

    async fn close(&self) -> Result<()> {
        self.drain_pending();
        self.session_decisions.lock().clear();
        self.inner.close().await
    }

    fn set_on_message(&self, handler: Option<MessageHandler>) {
        *self.user_on_message.lock() = handler;
    }

    fn set_on_close(&self, handler: Option<CloseHandler>) {
        *self.user_on_close.lock() = handler;
    }

    fn session_id(&self) -> Option<String> {
        self.inner.session_id()
    }
}
