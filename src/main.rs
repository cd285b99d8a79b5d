use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use scan_pilot::observer::ScanObserver;
use scan_pilot::orchestrator::Orchestrator;
use scan_pilot::scanner::{ConnectEngine, EngineSettings};
use scan_pilot::types::{ProgressEvent, ScanOutcome};
use scan_pilot::{ports, server};

const BAR_STEPS: u64 = 1000;

/// scan-pilot — run one TCP port scan with live progress and a readable report.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "scan-pilot",
    version,
    about = "Run one TCP port scan with live progress and a readable report.",
    long_about = None
)]
struct Cli {
    /// Target: IP, IPv4 CIDR or hostname; several may be separated by commas.
    #[arg(long, default_value = "localhost")]
    target: String,

    /// Port expression, e.g. `1-1000` or `22,80,443`.
    #[arg(long, default_value = "1-1000")]
    ports: String,

    /// Read ports from a file instead (one port or range per line, `#` comments).
    #[arg(long = "ports-file", conflicts_with = "ports")]
    ports_file: Option<PathBuf>,

    /// Max concurrent TCP connect attempts.
    #[arg(long, default_value_t = 1000)]
    concurrency: usize,

    /// Socket connect timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 400)]
    timeout_ms: u64,

    /// Skip banner grabbing and service version probes.
    #[arg(long = "no-service-info", default_value_t = false)]
    no_service_info: bool,

    /// Write the scan outcome as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Start the embedded HTTP UI instead of scanning once.
    #[arg(long = "serve-ui", default_value_t = false)]
    serve_ui: bool,

    /// Address for the HTTP UI.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Terminal observer: progress bar plus log lines printed above it.
struct ConsoleObserver {
    bar: ProgressBar,
}

impl ConsoleObserver {
    fn new() -> Self {
        let bar = ProgressBar::new(BAR_STEPS);
        let style = ProgressStyle::with_template("{spinner} [{bar:40}] {percent:>3}% {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        Self { bar }
    }
}

impl ScanObserver for ConsoleObserver {
    fn on_progress(&self, event: ProgressEvent) {
        self.bar
            .set_position((event.fraction() * BAR_STEPS as f64).round() as u64);
    }

    fn on_log(&self, text: &str) {
        // `println` on a hidden bar drops the line; suspend always prints.
        self.bar.suspend(|| println!("{}", text.trim_end()));
    }

    fn on_finished(&self) {
        self.bar.finish_and_clear();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = EngineSettings {
        concurrency: cli.concurrency,
        timeout: Duration::from_millis(cli.timeout_ms),
    };
    let orchestrator = Arc::new(
        Orchestrator::new(Arc::new(ConnectEngine::new(settings)))
            .with_service_info(!cli.no_service_info),
    );

    if cli.serve_ui {
        println!("UI server starting at http://{} (Ctrl+C to stop)", cli.bind);
        tokio::select! {
            res = server::spawn_server(&cli.bind, orchestrator) => res?,
            _ = tokio::signal::ctrl_c() => println!("Shutting down."),
        }
        return Ok(());
    }

    let ports = match cli.ports_file.as_deref() {
        Some(path) => ports::to_port_spec(&ports::load_ports_from_path(path)?),
        None => cli.ports.clone(),
    };

    println!("scan-pilot configuration:");
    println!("  target       : {}", cli.target);
    println!("  ports        : {}", ports);
    println!("  concurrency  : {}", cli.concurrency);
    println!("  timeout_ms   : {}", cli.timeout_ms);
    println!("  service_info : {}", !cli.no_service_info);

    let handle = orchestrator.start_scan(&cli.target, &ports, Arc::new(ConsoleObserver::new()))?;

    // Ctrl-C cancels the scan; the run then ends as a failure.
    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let outcome = handle.wait().await;

    if let Some(path) = cli.output.as_deref() {
        write_outcome_json(path, &outcome)
            .with_context(|| format!("failed to write JSON to {}", path.display()))?;
        println!("Wrote JSON outcome to {}", path.display());
    }

    if let ScanOutcome::Failure { reason } = outcome {
        bail!(reason);
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();
}

fn write_outcome_json(path: &Path, outcome: &ScanOutcome) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, outcome)?;
    Ok(())
}
