use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::ScanEngine;
use crate::observer::ScanObserver;
use crate::relay::relay;
use crate::report::format_report;
use crate::types::{ConfigError, ScanConfig, ScanOutcome};

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const FAILED: u8 = 2;

/// Single-flight state: Idle -> Running -> Idle | Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Running,
    /// The last run ended in a failure. A new run may start.
    Failed,
}

impl ScanState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            RUNNING => ScanState::Running,
            FAILED => ScanState::Failed,
            _ => ScanState::Idle,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("a scan is already running")]
    AlreadyRunning,
    #[error("invalid scan configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("no async runtime available to run the scan")]
    NoRuntime,
}

/// Owns the lifecycle of scan runs against one engine, one run at a time.
pub struct Orchestrator {
    engine: Arc<dyn ScanEngine>,
    service_info: bool,
    state: Arc<AtomicU8>,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn ScanEngine>) -> Self {
        Self {
            engine,
            service_info: true,
            state: Arc::new(AtomicU8::new(IDLE)),
        }
    }

    /// Whether the engine is asked for service names and versions. On by default.
    pub fn with_service_info(mut self, enabled: bool) -> Self {
        self.service_info = enabled;
        self
    }

    pub fn state(&self) -> ScanState {
        ScanState::from_raw(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == ScanState::Running
    }

    /// Start a scan in the background and return immediately.
    ///
    /// Rejected with [`StartError::AlreadyRunning`] while another run is in flight.
    /// Once accepted, `observer.on_finished` is called exactly once when the run ends,
    /// after the orchestrator has left the `Running` state.
    pub fn start_scan(
        &self,
        target: &str,
        ports: &str,
        observer: Arc<dyn ScanObserver>,
    ) -> Result<ScanHandle, StartError> {
        let config = ScanConfig::new(target, ports)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| StartError::NoRuntime)?;

        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
                (s != RUNNING).then_some(RUNNING)
            })
            .map_err(|_| StartError::AlreadyRunning)?;

        // Armed before spawning: a task dropped unpolled must still leave `Running`.
        let guard = IdleGuard {
            state: self.state.clone(),
            observer: observer.clone(),
            failed: None,
        };
        let cancel = CancellationToken::new();
        let engine = self.engine.clone();
        let service_info = self.service_info;
        let task_cancel = cancel.clone();

        let join = runtime.spawn(async move {
            let mut guard = guard;
            let outcome = run_scan(engine.as_ref(), &config, service_info, task_cancel, observer).await;
            guard.failed = Some(outcome.is_failure());
            outcome
        });

        Ok(ScanHandle { join, cancel })
    }
}

/// Resets the state and signals the observer when the scan task ends.
///
/// `failed` stays `None` when the run never produced an outcome (panic, or the task
/// was dropped by the runtime); that is reported on the log as a failure.
struct IdleGuard {
    state: Arc<AtomicU8>,
    observer: Arc<dyn ScanObserver>,
    failed: Option<bool>,
}

impl Drop for IdleGuard {
    fn drop(&mut self) {
        let failed = match self.failed {
            Some(failed) => failed,
            None => {
                error!("scan task ended without an outcome");
                self.observer.on_log("ERROR: scan task failed");
                true
            }
        };
        self.state
            .store(if failed { FAILED } else { IDLE }, Ordering::SeqCst);
        self.observer.on_finished();
    }
}

/// Handle to a started run.
#[derive(Debug)]
pub struct ScanHandle {
    join: JoinHandle<ScanOutcome>,
    cancel: CancellationToken,
}

impl ScanHandle {
    /// Ask the engine to stop. The run then ends with a failure outcome.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn wait(self) -> ScanOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => ScanOutcome::Failure {
                reason: format!("scan task failed: {e}"),
            },
        }
    }
}

/// Run one scan to its terminal outcome, reporting through `observer`.
///
/// Progress events are all forwarded before any terminal text is logged.
pub async fn run_scan(
    engine: &dyn ScanEngine,
    config: &ScanConfig,
    service_info: bool,
    cancel: CancellationToken,
    observer: Arc<dyn ScanObserver>,
) -> ScanOutcome {
    info!(scan_target = config.target(), ports = config.ports(), "starting scan");
    observer.on_log("Starting scan...");
    observer.on_log(&format!(
        "Target: {}, Ports: {}",
        config.target(),
        config.ports()
    ));
    observer.on_log("This may take a moment...");

    let scanner = match engine.create(cancel, config, service_info) {
        Ok(scanner) => scanner,
        Err(e) => return fail(observer.as_ref(), format!("failed to create scanner: {e}")),
    };

    let (progress, drain) = relay(observer.clone());
    let output = scanner.run(Some(progress)).await;
    let forwarded = drain.finish().await;
    debug!(forwarded, "progress relay closed");

    if !output.warnings.is_empty() {
        warn!(count = output.warnings.len(), "scan finished with warnings");
        observer.on_log(&format!(
            "WARNINGS: scan finished with warnings: {}",
            output.warnings.join("; ")
        ));
    }

    match output.result {
        Err(e) => fail(observer.as_ref(), format!("unable to run scan: {e}")),
        Ok(result) => {
            info!(
                hosts = result.hosts.len(),
                elapsed = result.elapsed_seconds,
                "scan complete"
            );
            observer.on_log(&format_report(&result));
            if output.warnings.is_empty() {
                ScanOutcome::Success { result }
            } else {
                ScanOutcome::SuccessWithWarnings {
                    result,
                    warnings: output.warnings,
                }
            }
        }
    }
}

fn fail(observer: &dyn ScanObserver, reason: String) -> ScanOutcome {
    error!(%reason, "scan failed");
    observer.on_log(&format!("ERROR: {reason}"));
    ScanOutcome::Failure { reason }
}
