//! Tool-call analytics for MCP servers and gateways.
//!
//! Two entry points feed one [`AnalyticsCollector`]:
//!
//! - [`InterceptedTransport`] wraps an MCP transport and observes
//!   `tools/call` request/response pairs at the wire boundary.
//! - [`wrap_tool_handler`] instruments an individual tool handler function.
//!
//! The collector aggregates per-tool and per-session statistics with
//! bounded-memory percentile windows, and streams event batches to a
//! pluggable [`Exporter`] on a timer or on demand.

pub mod collector;
pub mod config;
pub mod error;
pub mod event;
pub mod exporter;
pub mod interceptor;
pub mod message;
pub mod trace;
pub mod wrapper;

pub use collector::AnalyticsCollector;
pub use config::{AnalyticsConfig, ExporterKind, SamplingStrategy};
pub use error::{AnalyticsError, Result};
pub use event::{AnalyticsSnapshot, SessionStats, ToolCallEvent, ToolStats};
pub use exporter::{
    ConsoleExporter, Exporter, FnExporter, JsonLinesExporter, OtlpHttpExporter, build_exporter,
};
pub use interceptor::{InterceptOptions, InterceptedTransport, McpTransport};
pub use trace::{LogTracer, Span, SpanOutcome, SpanSlot, Tracer};
pub use wrapper::{WrapOptions, WrappedHandler, wrap_tool_handler};
