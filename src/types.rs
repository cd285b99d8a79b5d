use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Target and port expression for one scan run. Immutable once built.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    target: String,
    ports: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("target must not be empty")]
    EmptyTarget,
    #[error("ports must not be empty")]
    EmptyPorts,
}

impl ScanConfig {
    /// Trims both inputs and rejects empty ones. Syntax is left to the engine.
    pub fn new(target: &str, ports: &str) -> Result<Self, ConfigError> {
        let target = target.trim();
        let ports = ports.trim();
        if target.is_empty() {
            return Err(ConfigError::EmptyTarget);
        }
        if ports.is_empty() {
            return Err(ConfigError::EmptyPorts);
        }
        Ok(Self {
            target: target.to_string(),
            ports: ports.to_string(),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn ports(&self) -> &str {
        &self.ports
    }
}

/// Fractional completion in `[0.0, 1.0]`. Not guaranteed to increase between events.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct ProgressEvent(f64);

impl ProgressEvent {
    pub fn from_fraction(value: f64) -> Self {
        if value.is_nan() {
            return Self(0.0);
        }
        Self(value.clamp(0.0, 1.0))
    }

    pub fn from_percent(value: f32) -> Self {
        Self::from_fraction(f64::from(value) / 100.0)
    }

    pub fn fraction(self) -> f64 {
        self.0
    }

    pub fn percent(self) -> f64 {
        self.0 * 100.0
    }
}

/// One probed port of a host.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortResult {
    pub id: u16,
    pub protocol: String,
    pub state: String,
    pub service_name: String,
    pub service_product: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HostResult {
    pub addresses: Vec<String>,
    pub hostnames: Vec<String>,
    pub status: String,
    pub ports: Vec<PortResult>,
}

/// Structured result of a completed scan run. Hosts keep the engine's order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ScanResult {
    pub started_at: String,
    pub elapsed_seconds: f64,
    pub hosts: Vec<HostResult>,
}

/// Terminal state of one scan run. Exactly one is produced per run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    Success {
        result: ScanResult,
    },
    SuccessWithWarnings {
        result: ScanResult,
        warnings: Vec<String>,
    },
    Failure {
        reason: String,
    },
}

impl ScanOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ScanOutcome::Failure { .. })
    }

    pub fn result(&self) -> Option<&ScanResult> {
        match self {
            ScanOutcome::Success { result } | ScanOutcome::SuccessWithWarnings { result, .. } => {
                Some(result)
            }
            ScanOutcome::Failure { .. } => None,
        }
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            ScanOutcome::SuccessWithWarnings { warnings, .. } => warnings,
            _ => &[],
        }
    }
}
