//! Boundary to the capability that actually probes the network.
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::relay::ProgressSender;
use crate::types::{ScanConfig, ScanResult};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("invalid port specification: {0}")]
    InvalidPorts(String),
    #[error("failed to resolve {target}: {source}")]
    Resolve {
        target: String,
        #[source]
        source: std::io::Error,
    },
    #[error("scan cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

/// What a finished run hands back. Warnings are reported even when the run failed.
#[derive(Debug)]
pub struct RunOutput {
    pub result: Result<ScanResult, EngineError>,
    pub warnings: Vec<String>,
}

impl RunOutput {
    pub fn ok(result: ScanResult, warnings: Vec<String>) -> Self {
        Self {
            result: Ok(result),
            warnings,
        }
    }

    pub fn failed(error: EngineError, warnings: Vec<String>) -> Self {
        Self {
            result: Err(error),
            warnings,
        }
    }
}

/// Builds scanners for one configuration. Configuration errors surface here, not in `run`.
pub trait ScanEngine: Send + Sync {
    fn create(
        &self,
        cancel: CancellationToken,
        config: &ScanConfig,
        service_info: bool,
    ) -> Result<Box<dyn Scanner>, EngineError>;
}

/// A configured, not yet started scan.
#[async_trait]
pub trait Scanner: Send {
    /// Run to completion, cancellation or failure.
    ///
    /// Implementations must drop `progress` and every clone of it before returning;
    /// the orchestrator waits for the relay to close before it reports the outcome.
    async fn run(self: Box<Self>, progress: Option<ProgressSender>) -> RunOutput;
}
