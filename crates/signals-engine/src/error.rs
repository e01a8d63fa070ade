use std::path::PathBuf;

use signals_core::error::AnalysisError;
use signals_providers::error::{NotifyError, ProviderError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// The exchange rejected a request for exceeding its limits.
    pub fn is_rejection(&self) -> bool {
        matches!(self, EngineError::Provider(e) if e.is_rejection())
    }
}
