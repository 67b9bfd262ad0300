//! Exporters: sinks that receive batches of recorded events.
//!
//! The collector treats any error returned from [`Exporter::export`] as a
//! transient failure and re-queues the batch. Custom user functions are
//! wrapped by [`FnExporter`], which logs and swallows their errors so a
//! buggy callback cannot stall the pipeline.

use crate::config::{AnalyticsConfig, ExporterKind};
use crate::error::{AnalyticsError, Result};
use crate::event::ToolCallEvent;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Batch delivery contract.
#[async_trait]
pub trait Exporter: Send + Sync {
    async fn export(&self, batch: &[ToolCallEvent]) -> Result<()>;
}

/// Build the exporter selected by the configuration.
pub fn build_exporter(config: &AnalyticsConfig) -> Arc<dyn Exporter> {
    match config.exporter {
        ExporterKind::Console => Arc::new(ConsoleExporter),
        ExporterKind::Json => {
            let path = config
                .export_path
                .clone()
                .unwrap_or_else(|| PathBuf::from("tool-calls.jsonl"));
            Arc::new(JsonLinesExporter::new(path))
        }
        ExporterKind::Otlp => {
            let endpoint = config
                .otlp_endpoint
                .clone()
                .unwrap_or_else(|| "http://127.0.0.1:4318/v1/logs".to_string());
            Arc::new(OtlpHttpExporter::new(endpoint))
        }
    }
}

/// Logs each event through `tracing`.
pub struct ConsoleExporter;

#[async_trait]
impl Exporter for ConsoleExporter {
    async fn export(&self, batch: &[ToolCallEvent]) -> Result<()> {
        for event in batch {
            tracing::info!(
                target: "conflux::analytics",
                tool = %event.tool_name,
                session_id = event.session_id.as_deref().unwrap_or("<none>"),
                duration_ms = event.duration_ms,
                success = event.success,
                error = event.error_message.as_deref().unwrap_or(""),
                "tool call"
            );
        }
        Ok(())
    }
}

/// Appends one JSON object per event to a file.
pub struct JsonLinesExporter {
    path: PathBuf,
}

impl JsonLinesExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Exporter for JsonLinesExporter {
    async fn export(&self, batch: &[ToolCallEvent]) -> Result<()> {
        let mut lines = String::new();
        for event in batch {
            let line = serde_json::to_string(event)
                .map_err(|e| AnalyticsError::Export(format!("encode event: {e}")))?;
            lines.push_str(&line);
            lines.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(lines.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// POSTs the JSON-encoded batch to an OTLP-style HTTP endpoint.
pub struct OtlpHttpExporter {
    endpoint: String,
    client: reqwest::Client,
}

impl OtlpHttpExporter {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Exporter for OtlpHttpExporter {
    async fn export(&self, batch: &[ToolCallEvent]) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&batch)
            .send()
            .await
            .map_err(|e| AnalyticsError::Export(format!("send batch: {e}")))?;

        if !response.status().is_success() {
            return Err(AnalyticsError::Export(format!(
                "endpoint returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Type of a user-supplied export function.
pub type ExportFn =
    dyn Fn(Vec<ToolCallEvent>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// Adapter over a user-supplied export function.
///
/// Errors from the function are logged and swallowed, so user bugs never
/// cause the collector to re-queue indefinitely.
pub struct FnExporter {
    func: Arc<ExportFn>,
}

impl FnExporter {
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(Vec<ToolCallEvent>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            func: Arc::new(move |batch| Box::pin(func(batch))),
        }
    }
}

#[async_trait]
impl Exporter for FnExporter {
    async fn export(&self, batch: &[ToolCallEvent]) -> Result<()> {
        if let Err(e) = (self.func)(batch.to_vec()).await {
            tracing::warn!(error = %e, "custom exporter failed; batch dropped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn sample_event(tool: &str) -> ToolCallEvent {
        ToolCallEvent {
            tool_name: tool.to_string(),
            session_id: None,
            timestamp: ToolCallEvent::now_ms(),
            duration_ms: 5,
            success: true,
            error_message: None,
            error_code: None,
            input_size: 2,
            output_size: 10,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn json_lines_exporter_appends_one_line_per_event() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.jsonl");
        let exporter = JsonLinesExporter::new(&path);

        exporter
            .export(&[sample_event("a"), sample_event("b")])
            .await
            .expect("export");
        exporter.export(&[sample_event("c")]).await.expect("export");

        let contents = std::fs::read_to_string(&path).expect("read back");
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: ToolCallEvent = serde_json::from_str(lines[0]).expect("valid json line");
        assert_eq!(first.tool_name, "a");
    }

    #[tokio::test]
    async fn fn_exporter_swallows_user_errors() {
        let calls = Arc::new(Mutex::new(0usize));
        let seen = calls.clone();
        let exporter = FnExporter::new(move |_batch| {
            *seen.lock() += 1;
            async { Err(anyhow::anyhow!("user bug")) }
        });

        exporter
            .export(&[sample_event("a")])
            .await
            .expect("errors are swallowed");
        assert_eq!(*calls.lock(), 1);
    }
}
