#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use scan_pilot::engine::{EngineError, RunOutput, ScanEngine, Scanner};
use scan_pilot::observer::ScanObserver;
use scan_pilot::relay::ProgressSender;
use scan_pilot::types::{HostResult, PortResult, ProgressEvent, ScanConfig, ScanResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Progress(f64),
    Log(String),
    Finished,
}

/// Records every callback in arrival order.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn progress(&self) -> Vec<f64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Progress(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn logs(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Log(l) => Some(l),
                _ => None,
            })
            .collect()
    }

    pub fn finished_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Finished))
            .count()
    }

    /// Position of the first log chunk containing `needle`.
    pub fn log_index(&self, needle: &str) -> Option<usize> {
        self.events()
            .iter()
            .position(|e| matches!(e, Event::Log(l) if l.contains(needle)))
    }
}

impl ScanObserver for RecordingObserver {
    fn on_progress(&self, event: ProgressEvent) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Progress(event.fraction()));
    }

    fn on_log(&self, text: &str) {
        self.events.lock().unwrap().push(Event::Log(text.to_string()));
    }

    fn on_finished(&self) {
        self.events.lock().unwrap().push(Event::Finished);
    }
}

/// Engine whose behaviour is fixed up front.
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    pub create_error: Option<String>,
    pub progress: Vec<f32>,
    pub warnings: Vec<String>,
    pub run_error: Option<String>,
    pub result: ScanResult,
    /// When set, `run` waits for a notification (or cancellation) before finishing.
    pub gate: Option<Arc<Notify>>,
    /// Panic inside `run` after the progress script has been sent.
    pub panic_in_run: bool,
    pub runs: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    pub fn succeeding() -> Self {
        Self {
            progress: vec![10.0, 50.0, 100.0],
            result: sample_result(),
            ..Self::default()
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl ScanEngine for ScriptedEngine {
    fn create(
        &self,
        cancel: CancellationToken,
        _config: &ScanConfig,
        _service_info: bool,
    ) -> Result<Box<dyn Scanner>, EngineError> {
        if let Some(msg) = &self.create_error {
            return Err(EngineError::Other(msg.clone()));
        }
        Ok(Box::new(ScriptedScanner {
            script: self.clone(),
            cancel,
        }))
    }
}

struct ScriptedScanner {
    script: ScriptedEngine,
    cancel: CancellationToken,
}

#[async_trait]
impl Scanner for ScriptedScanner {
    async fn run(self: Box<Self>, progress: Option<ProgressSender>) -> RunOutput {
        let ScriptedScanner { script, cancel } = *self;
        script.runs.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = &progress {
            for pct in &script.progress {
                tx.send_percent(*pct);
                tokio::task::yield_now().await;
            }
        }
        if script.panic_in_run {
            panic!("scripted scanner blew up");
        }
        if let Some(gate) = &script.gate {
            tokio::select! {
                _ = gate.notified() => {}
                _ = cancel.cancelled() => {
                    return RunOutput::failed(EngineError::Cancelled, script.warnings);
                }
            }
        }
        match script.run_error {
            Some(msg) => RunOutput::failed(EngineError::Other(msg), script.warnings),
            None => RunOutput::ok(script.result, script.warnings),
        }
    }
}

pub fn sample_result() -> ScanResult {
    ScanResult {
        started_at: "2026-10-18T12:00:00Z".into(),
        elapsed_seconds: 0.5,
        hosts: vec![HostResult {
            addresses: vec!["127.0.0.1".into()],
            hostnames: vec!["localhost".into()],
            status: "up".into(),
            ports: vec![PortResult {
                id: 80,
                protocol: "tcp".into(),
                state: "open".into(),
                service_name: "http".into(),
                service_product: "nginx".into(),
            }],
        }],
    }
}
