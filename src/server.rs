use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::info;

use crate::observer::ScanObserver;
use crate::orchestrator::{Orchestrator, ScanState, StartError};
use crate::types::ProgressEvent;

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    current: Arc<Mutex<Option<CurrentRun>>>,
}

/// The run the UI is showing: its own log and the token that stops it.
#[derive(Clone)]
struct CurrentRun {
    ui: Arc<UiObserver>,
    cancel: CancellationToken,
}

impl AppState {
    fn current(&self) -> Option<CurrentRun> {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Observer backing the web UI: keeps the latest progress and the accumulated log.
#[derive(Debug, Default)]
pub struct UiObserver {
    inner: Mutex<UiLog>,
}

#[derive(Debug, Default)]
struct UiLog {
    progress: f64,
    text: String,
}

impl UiObserver {
    fn lock(&self) -> MutexGuard<'_, UiLog> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn progress(&self) -> f64 {
        self.lock().progress
    }

    pub fn text(&self) -> String {
        self.lock().text.clone()
    }
}

impl ScanObserver for UiObserver {
    fn on_progress(&self, event: ProgressEvent) {
        self.lock().progress = event.fraction();
    }

    fn on_log(&self, text: &str) {
        let mut log = self.lock();
        log.text.push_str(text);
        if !text.ends_with('\n') {
            log.text.push('\n');
        }
    }

    fn on_finished(&self) {
        info!("scan finished, ready for the next one");
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub state: ScanState,
    pub progress: f64,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub target: String,
    pub ports: String,
}

/// API under `/api`, static UI from `ui/` for everything else.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = AppState {
        orchestrator,
        current: Arc::new(Mutex::new(None)),
    };

    let api = Router::new()
        .route("/status", get(get_status))
        .route("/scan", post(post_scan))
        .route("/cancel", post(post_cancel))
        .route("/log", get(get_log))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state);

    let static_svc = ServeDir::new("ui").append_index_html_on_directories(true);

    Router::new()
        .nest("/api", api)
        .fallback_service(static_svc)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str, orchestrator: Arc<Orchestrator>) -> Result<()> {
    let app = router(orchestrator);
    info!(%bind, "serving UI");
    axum::serve(tokio::net::TcpListener::bind(bind).await?, app).await?;
    Ok(())
}

fn status(app: &AppState) -> Status {
    Status {
        state: app.orchestrator.state(),
        progress: app.current().map_or(0.0, |run| run.ui.progress()),
    }
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(status(&app)))
}

async fn get_log(State(app): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        app.current().map(|run| run.ui.text()).unwrap_or_default(),
    )
}

async fn post_scan(State(app): State<AppState>, Json(req): Json<ScanRequest>) -> impl IntoResponse {
    // Each run logs into its own observer; a rejected request leaves the shown log alone.
    let ui = Arc::new(UiObserver::default());
    match app
        .orchestrator
        .start_scan(&req.target, &req.ports, ui.clone())
    {
        Ok(handle) => {
            *app.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(CurrentRun {
                ui,
                cancel: handle.cancellation_token(),
            });
            (StatusCode::ACCEPTED, Json(status(&app))).into_response()
        }
        Err(e @ StartError::AlreadyRunning) => (StatusCode::CONFLICT, e.to_string()).into_response(),
        Err(e @ StartError::Config(_)) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        Err(e @ StartError::NoRuntime) => {
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn post_cancel(State(app): State<AppState>) -> impl IntoResponse {
    match app.current() {
        Some(run) if app.orchestrator.is_running() => {
            run.cancel.cancel();
            StatusCode::ACCEPTED
        }
        _ => StatusCode::NO_CONTENT,
    }
}
