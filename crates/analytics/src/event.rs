//! Event and statistics model.
//!
//! A [`ToolCallEvent`] is one observed tool invocation; everything else in
//! this module is a read model derived from recorded events.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One recorded tool invocation. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallEvent {
    /// Tool name as seen on the wire.
    pub tool_name: String,
    /// MCP session id, when the call was observed inside a session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Milliseconds since the Unix epoch at which the call completed.
    pub timestamp: i64,
    pub duration_ms: u64,
    pub success: bool,
    /// Present only when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// JSON-RPC error code, when the failure carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,
    /// Size in bytes of the encoded call arguments.
    pub input_size: u64,
    /// Size in bytes of the encoded response payload (result or error).
    pub output_size: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl ToolCallEvent {
    /// Current wall-clock time in epoch milliseconds.
    pub fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Aggregated statistics for one tool (or one session's totals).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStats {
    pub count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub avg_ms: f64,
    /// Epoch milliseconds of the most recent call.
    pub last_called_at: i64,
}

/// Per-session statistics: session totals plus a per-tool breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    #[serde(flatten)]
    pub totals: ToolStats,
    pub tools: HashMap<String, ToolStats>,
}

/// Point-in-time view over everything the collector has accumulated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    pub total_calls: u64,
    pub total_errors: u64,
    pub error_rate: f64,
    pub uptime_ms: u64,
    pub tools: HashMap<String, ToolStats>,
    pub sessions: HashMap<String, SessionStats>,
}
