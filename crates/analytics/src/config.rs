//! Analytics configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SAMPLE_RATE: f64 = 1.0;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 10_000;
pub const DEFAULT_TOOL_WINDOW_SIZE: usize = 2_048;

/// How sampling decisions are made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    /// Each call is sampled independently.
    #[default]
    PerCall,
    /// The first call on a session decides for the whole session.
    PerSession,
}

/// Which built-in exporter to construct.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExporterKind {
    #[default]
    Console,
    /// JSON lines appended to `export_path`.
    Json,
    /// JSON batch POSTed to `otlp_endpoint`.
    Otlp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyticsConfig {
    pub exporter: ExporterKind,
    /// Target file for the `json` exporter.
    pub export_path: Option<PathBuf>,
    /// Target endpoint for the `otlp` exporter.
    pub otlp_endpoint: Option<String>,
    /// Probability in `[0, 1]` that a call is recorded.
    pub sample_rate: f64,
    pub sampling_strategy: SamplingStrategy,
    /// Zero disables the periodic flush timer.
    pub flush_interval_ms: u64,
    /// Capacity of the in-memory ring buffer of recent events.
    pub max_buffer_size: usize,
    /// Per-tool percentile window; clamped to at least 1.
    pub tool_window_size: usize,
    /// Stamped onto every recorded event (event-local keys win).
    pub metadata: HashMap<String, String>,
    /// Start a span per sampled call.
    pub tracing: bool,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            exporter: ExporterKind::Console,
            export_path: None,
            otlp_endpoint: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            sampling_strategy: SamplingStrategy::PerCall,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            tool_window_size: DEFAULT_TOOL_WINDOW_SIZE,
            metadata: HashMap::new(),
            tracing: false,
        }
    }
}

impl AnalyticsConfig {
    /// Sample rate clamped to `[0, 1]`.
    pub fn effective_sample_rate(&self) -> f64 {
        self.sample_rate.clamp(0.0, 1.0)
    }

    /// Percentile window size, never below 1.
    pub fn effective_tool_window_size(&self) -> usize {
        self.tool_window_size.max(1)
    }

    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_interval_ms > 0).then(|| Duration::from_millis(self.flush_interval_ms))
    }
}
