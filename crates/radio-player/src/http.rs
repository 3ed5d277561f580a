//! Local HTTP API: the UI boundary.
//!
//! Commands are forwarded to `PlayerCore` fire-and-forget; their effect shows
//! up in the next `/api/state`.  On the web platform `/stream` relays the
//! streaming element's bytes to whatever audio sink attaches.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use radio_proto::config::SocialLinks;
use radio_proto::protocol::{
    Command, NowPlaying, PlaybackState, Platform, StationInfo, StreamStats,
};
use radio_proto::state::StateManager;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

use crate::core::PlayerEvent;
use crate::element::StreamTap;
use crate::BroadcastMessage;

const RECENT_LOG_LINES: usize = 50;

// ── recent logs ───────────────────────────────────────────────────────────────

/// Ring of the last WARN/ERROR lines seen on the broadcast channel.
#[derive(Clone, Default)]
pub struct RecentLogs {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl RecentLogs {
    /// Spawn a task that keeps the ring filled from `rx`.
    pub fn collect(mut rx: broadcast::Receiver<BroadcastMessage>) -> Self {
        let logs = Self::default();
        let sink = logs.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(BroadcastMessage::Log(line)) => sink.push(line),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        logs
    }

    pub fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() == RECENT_LOG_LINES {
                lines.pop_front();
            }
            lines.push_back(line);
        }
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }
}

// ── state ─────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<PlayerEvent>,
    social: Arc<SocialLinks>,
    /// Present only when the web backend feeds it.
    tap: Option<StreamTap>,
    logs: RecentLogs,
}

impl HttpState {
    pub fn new(
        state_manager: Arc<StateManager>,
        event_tx: mpsc::Sender<PlayerEvent>,
        social: SocialLinks,
        tap: Option<StreamTap>,
        logs: RecentLogs,
    ) -> Self {
        Self {
            state_manager,
            event_tx,
            social: Arc::new(social),
            tap,
            logs,
        }
    }
}

#[derive(Serialize)]
struct ApiState {
    is_playing: bool,
    playback_state: PlaybackState,
    volume: u8,
    current_song: NowPlaying,
    stats: StreamStats,
    station: StationInfo,
    platform: Platform,
    last_error: Option<String>,
    song_updated_at: Option<String>,
}

#[derive(Serialize)]
struct VolumeStatus {
    volume: u8,
}

// ── router ────────────────────────────────────────────────────────────────────

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/play", get(play).post(play))
        .route("/api/pause", get(pause).post(pause))
        .route("/api/toggle", get(toggle).post(toggle))
        .route("/api/volume/:value", get(set_volume).post(set_volume))
        .route("/api/volume", get(get_volume))
        .route("/api/social/:key", get(open_social))
        .route("/api/logs", get(get_logs))
        .route("/stream", get(stream))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(bind_address: String, port: u16, state: HttpState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

// ── handlers ──────────────────────────────────────────────────────────────────

async fn send_command(state: &HttpState, cmd: Command) -> StatusCode {
    if state.event_tx.send(PlayerEvent::Command(cmd)).await.is_err() {
        error!("HTTP API: player core is gone");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::ACCEPTED
}

async fn get_state(State(state): State<HttpState>) -> Json<ApiState> {
    let s = state.state_manager.get_state().await;
    Json(ApiState {
        is_playing: s.is_playing(),
        playback_state: s.playback_state,
        volume: s.volume.percent(),
        current_song: s.current_song,
        stats: s.stats,
        station: s.station,
        platform: s.platform,
        last_error: s.last_error,
        song_updated_at: s.song_updated_at.map(|t| t.to_rfc3339()),
    })
}

async fn play(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Play");
    send_command(&state, Command::Play).await
}

async fn pause(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Pause");
    send_command(&state, Command::Pause).await
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Toggle");
    send_command(&state, Command::TogglePlay).await
}

async fn set_volume(State(state): State<HttpState>, Path(value): Path<i64>) -> StatusCode {
    info!("HTTP API: Set volume to {}", value);
    send_command(&state, Command::SetVolume { value }).await
}

async fn get_volume(State(state): State<HttpState>) -> Json<VolumeStatus> {
    let volume = state.state_manager.volume().await.percent();
    Json(VolumeStatus { volume })
}

/// Unknown keys are a no-op.
async fn open_social(State(state): State<HttpState>, Path(key): Path<String>) -> Response {
    match state.social.resolve(&key) {
        Some(url) => {
            info!("HTTP API: open social link {}", key);
            Redirect::to(url).into_response()
        }
        None => {
            debug!("HTTP API: unknown social key {}", key);
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

async fn get_logs(State(state): State<HttpState>) -> Json<Vec<String>> {
    Json(state.logs.snapshot())
}

async fn stream(State(state): State<HttpState>) -> Response {
    let Some(tap) = state.tap else {
        return StatusCode::NOT_FOUND.into_response();
    };

    info!("HTTP API: stream listener attached");
    let mut headers = HeaderMap::new();
    let content_type = tap
        .content_type()
        .and_then(|ct| HeaderValue::from_str(&ct).ok())
        .unwrap_or(HeaderValue::from_static("audio/mpeg"));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    let chunks = futures_util::stream::unfold(tap.subscribe(), |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(chunk) => return Some((Ok::<Bytes, std::io::Error>(chunk), rx)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("HTTP API: stream listener skipped {} chunks", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    (headers, Body::from_stream(chunks)).into_response()
}
