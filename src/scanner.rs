use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ::time::{format_description::well_known, OffsetDateTime};
use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::{EngineError, RunOutput, ScanEngine, Scanner};
use crate::ports::parse_port_spec;
use crate::relay::ProgressSender;
use crate::service;
use crate::targets::{self, ResolvedHost, TargetSpec};
use crate::types::{HostResult, PortResult, ScanConfig, ScanResult};

/// Tuning for the TCP connect engine.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// Max concurrent connect attempts, clamped to 1..=5000.
    pub concurrency: usize,
    /// Per-socket connect timeout.
    pub timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            concurrency: 1000,
            timeout: Duration::from_millis(400),
        }
    }
}

/// Built-in engine: asynchronous TCP connect scan with optional service identification.
#[derive(Clone, Debug, Default)]
pub struct ConnectEngine {
    settings: EngineSettings,
}

impl ConnectEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }
}

impl ScanEngine for ConnectEngine {
    fn create(
        &self,
        cancel: CancellationToken,
        config: &ScanConfig,
        service_info: bool,
    ) -> Result<Box<dyn Scanner>, EngineError> {
        let targets = targets::parse_targets(config.target())?;
        let ports = parse_port_spec(config.ports())
            .map_err(|e| EngineError::InvalidPorts(format!("{e:#}")))?;
        Ok(Box::new(ConnectScanner {
            targets,
            ports,
            settings: self.settings.clone(),
            service_info,
            cancel,
        }))
    }
}

struct ConnectScanner {
    targets: Vec<TargetSpec>,
    ports: Vec<u16>,
    settings: EngineSettings,
    service_info: bool,
    cancel: CancellationToken,
}

#[derive(Debug)]
enum Probe {
    Open { product: String },
    Closed,
    Filtered,
    Unreachable(String),
}

type ProbeReport = (usize, u16, Probe);

/// Folds finished probes into per-host state and turns completion counts into progress events.
///
/// Only open ports and per-host counters are kept, so memory follows the host count
/// rather than hosts × ports.
struct Tally {
    total: usize,
    done: usize,
    last_percent: Option<u64>,
    progress: Option<ProgressSender>,
    hosts: Vec<HostTally>,
    failures: Vec<String>,
}

impl Tally {
    fn new(host_count: usize, total: usize, progress: Option<ProgressSender>) -> Self {
        Self {
            total,
            done: 0,
            last_percent: None,
            progress,
            hosts: (0..host_count).map(|_| HostTally::default()).collect(),
            failures: Vec::new(),
        }
    }

    fn record(&mut self, res: Result<ProbeReport, JoinError>) {
        self.done += 1;
        match res {
            Ok((idx, port, probe)) => match self.hosts.get_mut(idx) {
                Some(host) => host.add(port, probe),
                None => self.failures.push(format!("probe for unknown host #{idx}")),
            },
            Err(e) => self.failures.push(format!("probe task failed: {e}")),
        }
        let percent = if self.total == 0 {
            100
        } else {
            (self.done as u64 * 100) / self.total as u64
        };
        if self.last_percent != Some(percent) {
            self.last_percent = Some(percent);
            if let Some(tx) = &self.progress {
                tx.send_percent(percent as f32);
            }
        }
    }

    /// Build host results. Only hosts that answered at least once are reported.
    /// Consumes the tally, closing its progress sender.
    fn summarize(self, hosts: &[ResolvedHost], warnings: &mut Vec<String>) -> Vec<HostResult> {
        warnings.extend(self.failures);
        let mut out = Vec::new();
        for (host, mut t) in hosts.iter().zip(self.hosts) {
            if t.unreachable > 0 {
                warnings.push(format!(
                    "{}: {} probes failed ({})",
                    host.addr,
                    t.unreachable,
                    t.last_error.as_deref().unwrap_or("unknown error")
                ));
            }
            if !t.alive {
                continue;
            }
            t.open.sort_by_key(|(port, _)| *port);
            out.push(HostResult {
                addresses: vec![host.addr.to_string()],
                hostnames: host.hostname.iter().cloned().collect(),
                status: "up".to_string(),
                ports: t
                    .open
                    .into_iter()
                    .map(|(port, product)| PortResult {
                        id: port,
                        protocol: "tcp".to_string(),
                        state: "open".to_string(),
                        service_name: service::service_name(port).to_string(),
                        service_product: product,
                    })
                    .collect(),
            });
        }
        out
    }
}

#[derive(Default)]
struct HostTally {
    alive: bool,
    open: Vec<(u16, String)>,
    unreachable: usize,
    last_error: Option<String>,
}

impl HostTally {
    fn add(&mut self, port: u16, probe: Probe) {
        match probe {
            Probe::Open { product } => {
                self.alive = true;
                self.open.push((port, product));
            }
            Probe::Closed => self.alive = true,
            Probe::Filtered => {}
            Probe::Unreachable(err) => {
                self.unreachable += 1;
                self.last_error = Some(err);
            }
        }
    }
}

#[async_trait]
impl Scanner for ConnectScanner {
    async fn run(self: Box<Self>, progress: Option<ProgressSender>) -> RunOutput {
        let started_at = now_rfc3339();
        let start = Instant::now();

        let resolution = tokio::select! {
            res = targets::resolve(&self.targets) => res,
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
        };
        let resolution = match resolution {
            Ok(r) => r,
            Err(e) => return RunOutput::failed(e, Vec::new()),
        };
        let hosts = resolution.hosts;
        let mut warnings = resolution.warnings;

        let total = hosts.len() * self.ports.len();
        debug!(hosts = hosts.len(), ports = self.ports.len(), total, "probing");
        let mut tally = Tally::new(hosts.len(), total, progress);

        let sem = Arc::new(Semaphore::new(self.settings.concurrency.clamp(1, 5_000)));
        let mut set = JoinSet::new();

        'spawn: for (idx, host) in hosts.iter().enumerate() {
            for &port in &self.ports {
                let permit = tokio::select! {
                    permit = sem.clone().acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => break 'spawn,
                    },
                    _ = self.cancel.cancelled() => break 'spawn,
                };
                while let Some(res) = set.try_join_next() {
                    tally.record(res);
                }

                let addr = SocketAddr::new(host.addr, port);
                let timeout = self.settings.timeout;
                let service_info = self.service_info;
                set.spawn(async move {
                    let _permit = permit; // keep permit until task completes
                    (idx, port, probe(addr, timeout, service_info).await)
                });
            }
        }

        loop {
            tokio::select! {
                res = set.join_next() => match res {
                    Some(res) => tally.record(res),
                    None => break,
                },
                _ = self.cancel.cancelled() => break,
            }
        }

        if self.cancel.is_cancelled() {
            set.shutdown().await;
            return RunOutput::failed(EngineError::Cancelled, warnings);
        }

        let result = ScanResult {
            started_at,
            elapsed_seconds: start.elapsed().as_secs_f64(),
            hosts: tally.summarize(&hosts, &mut warnings),
        };
        RunOutput::ok(result, warnings)
    }
}

async fn probe(addr: SocketAddr, timeout: Duration, service_info: bool) -> Probe {
    match time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(mut stream)) => {
            let product = if service_info {
                service::identify(&mut stream, addr, timeout).await
            } else {
                String::new()
            };
            Probe::Open { product }
        }
        Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => Probe::Closed,
        Ok(Err(e)) => Probe::Unreachable(e.to_string()),
        Err(_) => Probe::Filtered,
    }
}

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
