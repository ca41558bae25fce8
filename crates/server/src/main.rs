use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use server_api::{PrinterHost, QueueRunner};
use shared::{
    domain::QueueEntry,
    error::{ApiError, ErrorCode},
    protocol::{
        PlaylistSettings, PrinterEvent, PushFrame, QueueResponse, SettingsDocument, SettingsPatch,
    },
};
use storage::Storage;
use tracing::{error, info, warn};

mod config;
mod printer;

use config::{load_settings, prepare_database_url};
use printer::{DisconnectedPrinter, HttpPrinter};

const API_KEY_HEADER: &str = "X-Api-Key";

type HttpError = (StatusCode, Json<ApiError>);

struct AppState {
    runner: Arc<QueueRunner>,
    storage: Storage,
    api_key: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let printer: Arc<dyn PrinterHost> = match settings.printer_url.as_deref() {
        Some(url) => Arc::new(HttpPrinter::new(url, settings.printer_api_key.clone())?),
        None => {
            warn!("no printer url configured; queue will not print");
            Arc::new(DisconnectedPrinter)
        }
    };
    let runner = Arc::new(QueueRunner::new(Arc::new(storage.clone()), printer));
    runner
        .handle_event(PrinterEvent::Startup)
        .await
        .map_err(|e| anyhow::anyhow!(e.message))?;

    spawn_schedule(
        runner.clone(),
        Duration::from_secs(settings.schedule_tick_seconds.max(1)),
    );

    let state = AppState {
        runner,
        storage,
        api_key: settings.api_key,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "playlist server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn spawn_schedule(runner: Arc<QueueRunner>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let now = chrono::Local::now().naive_local();
            match runner.tick(now).await {
                Ok(due) if !due.is_empty() => info!(?due, "ran scheduled queue actions"),
                Ok(_) => {}
                Err(error) => warn!(message = %error.message, "scheduled queue action failed"),
            }
        }
    });
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/settings", get(get_settings).post(post_settings))
        .route("/plugin/playlist/queue", get(get_queue).post(set_queue))
        .route("/plugin/playlist/start", post(start_queue))
        .route("/plugin/playlist/events", post(printer_event))
        .route("/sockjs", get(ws_handler))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, HttpError> {
    state.storage.health_check().await.map_err(|e| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiError::new(ErrorCode::Internal, e.to_string())),
        )
    })?;
    Ok("ok")
}

fn require_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), HttpError> {
    let presented = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    if presented != Some(state.api_key.as_str()) {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ApiError::new(
                ErrorCode::Unauthorized,
                "missing or invalid api key",
            )),
        ));
    }
    Ok(())
}

fn status_for(err: ApiError) -> HttpError {
    let status = match err.code {
        ErrorCode::Unauthorized => StatusCode::FORBIDDEN,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

async fn get_settings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SettingsDocument<PlaylistSettings>>, HttpError> {
    let settings = state.runner.settings().await.map_err(status_for)?;
    Ok(Json(SettingsDocument::new(settings)))
}

async fn post_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(document): Json<SettingsDocument<SettingsPatch>>,
) -> Result<Json<SettingsDocument<PlaylistSettings>>, HttpError> {
    require_api_key(&state, &headers)?;
    let patch = document.into_inner();
    let settings = state
        .runner
        .update_settings(&patch)
        .await
        .map_err(status_for)?;
    state
        .runner
        .handle_event(PrinterEvent::SettingsUpdated)
        .await
        .map_err(status_for)?;
    Ok(Json(SettingsDocument::new(settings)))
}

async fn get_queue(State(state): State<Arc<AppState>>) -> Result<Json<QueueResponse>, HttpError> {
    let playlist = state.runner.persisted_queue().await.map_err(status_for)?;
    Ok(Json(QueueResponse { playlist }))
}

async fn set_queue(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(queue): Json<Vec<QueueEntry>>,
) -> Result<StatusCode, HttpError> {
    require_api_key(&state, &headers)?;
    state.runner.set_queue(queue).await.map_err(status_for)?;
    Ok(StatusCode::OK)
}

async fn start_queue(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(queue): Json<Vec<QueueEntry>>,
) -> Result<StatusCode, HttpError> {
    require_api_key(&state, &headers)?;
    state.runner.start_queue(queue).await.map_err(status_for)?;
    Ok(StatusCode::OK)
}

async fn printer_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(event): Json<PrinterEvent>,
) -> Result<StatusCode, HttpError> {
    require_api_key(&state, &headers)?;
    state.runner.handle_event(event).await.map_err(status_for)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: axum::extract::ws::WebSocket) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.runner.subscribe();

    let send_task = tokio::spawn(async move {
        while let Ok(message) = events_rx.recv().await {
            let text = match PushFrame::playlist(&message).and_then(|f| serde_json::to_string(&f)) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // A fresh client gets the running queue right away.
    if let Err(error) = state.runner.handle_event(PrinterEvent::ClientOpened).await {
        warn!(message = %error.message, "failed to greet push client");
    }

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
