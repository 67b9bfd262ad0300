//! Pluggable tracing for observed tool calls.
//!
//! Span creation is asynchronous because tracers may need I/O (exporter
//! handshakes, context lookups). A [`SpanSlot`] holds the call's span state
//! so that a span whose initialization finishes after the response has
//! already arrived is still closed instead of leaking.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Terminal state of an observed call, applied to its span.
#[derive(Debug, Clone)]
pub struct SpanOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl SpanOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// A started span; ended exactly once.
pub trait Span: Send {
    fn end(self: Box<Self>, outcome: &SpanOutcome);
}

/// Span factory. Starting a span may suspend.
#[async_trait]
pub trait Tracer: Send + Sync {
    async fn start_span(&self, tool_name: &str) -> anyhow::Result<Box<dyn Span>>;
}

enum SpanState {
    /// Initialization in flight.
    Pending,
    /// Span started, not yet ended.
    Ready(Box<dyn Span>),
    /// The call finished before initialization did; the outcome is parked
    /// here so `fulfill` can end the span immediately.
    ClosedEarly(SpanOutcome),
    Finished,
}

/// Shared slot tying an in-flight span initialization to its call.
///
/// Whichever of `fulfill` and `close` runs second performs the actual end,
/// so no ordering of response vs. initialization drops a span.
#[derive(Clone)]
pub struct SpanSlot {
    state: Arc<Mutex<SpanState>>,
}

impl SpanSlot {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SpanState::Pending)),
        }
    }

    /// Deliver the started span from the initialization task.
    pub fn fulfill(&self, span: Box<dyn Span>) {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, SpanState::Finished) {
            SpanState::Pending => *state = SpanState::Ready(span),
            SpanState::ClosedEarly(outcome) => span.end(&outcome),
            SpanState::Ready(_) | SpanState::Finished => {}
        }
    }

    /// Initialization failed; the call proceeds untraced.
    pub fn abandon(&self) {
        *self.state.lock() = SpanState::Finished;
    }

    /// Close the span with the call's outcome. Safe to call at most once
    /// from the response path and once more from teardown.
    pub fn close(&self, outcome: SpanOutcome) {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, SpanState::Finished) {
            SpanState::Ready(span) => span.end(&outcome),
            SpanState::Pending => *state = SpanState::ClosedEarly(outcome),
            SpanState::ClosedEarly(parked) => *state = SpanState::ClosedEarly(parked),
            SpanState::Finished => {}
        }
    }
}

impl Default for SpanSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Default tracer backed by the `tracing` crate.
#[derive(Debug, Clone, Default)]
pub struct LogTracer;

struct LogSpan {
    span: tracing::Span,
    started: Instant,
}

#[async_trait]
impl Tracer for LogTracer {
    async fn start_span(&self, tool_name: &str) -> anyhow::Result<Box<dyn Span>> {
        let span = tracing::info_span!("mcp.tool_call", tool = %tool_name);
        Ok(Box::new(LogSpan {
            span,
            started: Instant::now(),
        }))
    }
}

impl Span for LogSpan {
    fn end(self: Box<Self>, outcome: &SpanOutcome) {
        let elapsed = self.started.elapsed();
        self.span.in_scope(|| {
            if outcome.success {
                tracing::debug!(elapsed = ?elapsed, "tool call span closed");
            } else {
                tracing::debug!(
                    elapsed = ?elapsed,
                    error = outcome.error.as_deref().unwrap_or(""),
                    "tool call span closed with error"
                );
            }
        });
    }
}
