//! Local HTTP control API.
//!
//! Mirrors the terminal controls for scripts and desktop shortcuts.
//! Binds to 127.0.0.1 only.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use super::ControlEvent;
use crate::engine::Voice;
use crate::reader::controller::PlaybackSnapshot;
use crate::service::ReaderEvent;

#[derive(Clone)]
pub struct ControlApiState {
    pub events: mpsc::UnboundedSender<ReaderEvent>,
    pub snapshot: watch::Receiver<PlaybackSnapshot>,
    pub voices: watch::Receiver<Vec<Voice>>,
}

// --- Request/Response types ---

#[derive(Debug, Default, Deserialize)]
struct SettingsRequest {
    voice: Option<String>,
    rate: Option<f32>,
    pitch: Option<f32>,
}

#[derive(Debug, Serialize)]
struct SimpleResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SimpleResponse {
    fn ok(status: &str) -> Self {
        Self {
            status: status.into(),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            error: Some(message.into()),
        }
    }
}

/// Build the axum router.
pub fn router(state: ControlApiState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/voices", get(handle_voices))
        .route("/play-pause", post(handle_play_pause))
        .route("/stop", post(handle_stop))
        .route("/next", post(handle_next))
        .route("/previous", post(handle_previous))
        .route("/settings", post(handle_settings))
        .with_state(state)
}

/// Start the control API as a background tokio task.
pub async fn start_control_api(state: ControlApiState, port: u16) {
    let app = router(state);
    let addr = format!("127.0.0.1:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("Failed to bind control API on {addr}: {e}");
            return;
        }
    };
    info!("Control API listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Control API server error: {e}");
        }
    });
}

// --- Handlers ---

async fn handle_status(State(state): State<ControlApiState>) -> Json<PlaybackSnapshot> {
    Json(state.snapshot.borrow().clone())
}

async fn handle_voices(State(state): State<ControlApiState>) -> Json<Vec<Voice>> {
    Json(state.voices.borrow().clone())
}

fn dispatch(state: &ControlApiState, events: Vec<ControlEvent>, status: &str) -> Json<SimpleResponse> {
    for event in events {
        if state.events.send(event.into()).is_err() {
            return Json(SimpleResponse::err("reader is not running"));
        }
    }
    Json(SimpleResponse::ok(status))
}

async fn handle_play_pause(State(state): State<ControlApiState>) -> Json<SimpleResponse> {
    dispatch(&state, vec![ControlEvent::TogglePlayPause], "ok")
}

async fn handle_stop(State(state): State<ControlApiState>) -> Json<SimpleResponse> {
    dispatch(&state, vec![ControlEvent::Stop], "stopped")
}

async fn handle_next(State(state): State<ControlApiState>) -> Json<SimpleResponse> {
    dispatch(&state, vec![ControlEvent::Next], "ok")
}

async fn handle_previous(State(state): State<ControlApiState>) -> Json<SimpleResponse> {
    dispatch(&state, vec![ControlEvent::Previous], "ok")
}

async fn handle_settings(
    State(state): State<ControlApiState>,
    Json(req): Json<SettingsRequest>,
) -> Json<SimpleResponse> {
    let mut events = Vec::new();

    if let Some(voice) = req.voice {
        if !state.voices.borrow().iter().any(|v| v.id == voice) {
            return Json(SimpleResponse::err(format!("Unknown voice: {voice}")));
        }
        events.push(ControlEvent::SetVoice(voice));
    }
    if let Some(rate) = req.rate {
        events.push(ControlEvent::SetRate(rate));
    }
    if let Some(pitch) = req.pitch {
        events.push(ControlEvent::SetPitch(pitch));
    }

    if events.is_empty() {
        return Json(SimpleResponse::err("no settings given"));
    }
    dispatch(&state, events, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::voice;
    use crate::reader::controller::PlaybackStatus;

    fn state() -> (ControlApiState, mpsc::UnboundedReceiver<ReaderEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (_, snapshot) = watch::channel(PlaybackSnapshot {
            status: PlaybackStatus::Paused,
            position: 2,
            total: 5,
            voice: Some("af_heart".into()),
            rate: 1.4,
            pitch: 0.8,
        });
        let (_, voices) = watch::channel(vec![voice("af_heart", "Kokoro Heart (en-US)", "en-US")]);
        (
            ControlApiState {
                events,
                snapshot,
                voices,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn status_reports_snapshot() {
        let (state, _rx) = state();
        let Json(snapshot) = handle_status(State(state)).await;
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["status"], "paused");
        assert_eq!(json["position"], 2);
        assert_eq!(json["voice"], "af_heart");
    }

    #[tokio::test]
    async fn transport_routes_forward_events() {
        let (state, mut rx) = state();
        handle_play_pause(State(state.clone())).await;
        handle_next(State(state.clone())).await;
        handle_stop(State(state)).await;

        assert_eq!(rx.recv().await, Some(ControlEvent::TogglePlayPause.into()));
        assert_eq!(rx.recv().await, Some(ControlEvent::Next.into()));
        assert_eq!(rx.recv().await, Some(ControlEvent::Stop.into()));
    }

    #[tokio::test]
    async fn settings_validate_voice() {
        let (state, mut rx) = state();
        let req = SettingsRequest {
            voice: Some("nope".into()),
            rate: Some(1.8),
            ..SettingsRequest::default()
        };
        let Json(resp) = handle_settings(State(state.clone()), Json(req)).await;
        assert_eq!(resp.status, "error");
        assert!(rx.try_recv().is_err());

        let req = SettingsRequest {
            voice: Some("af_heart".into()),
            pitch: Some(1.1),
            ..SettingsRequest::default()
        };
        let Json(resp) = handle_settings(State(state), Json(req)).await;
        assert_eq!(resp.status, "ok");
        assert_eq!(rx.recv().await, Some(ControlEvent::SetVoice("af_heart".into()).into()));
        assert_eq!(rx.recv().await, Some(ControlEvent::SetPitch(1.1).into()));
    }
}
