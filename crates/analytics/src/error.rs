//! Analytics error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// An exporter rejected a batch. The batch is re-queued by the collector.
    #[error("export failed: {0}")]
    Export(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;
