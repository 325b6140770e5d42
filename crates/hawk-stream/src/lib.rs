//! HTTP control surface and video re-publishing.
//!
//! ```text
//! GET  /video_feed          multipart MJPEG of the annotated frame
//! POST /do                  takeoff
//! POST /land                land and end the session
//! POST /mode/{off|search|track}
//! POST /keys/{key}          hold a key for the configured window
//! GET  /status              flight telemetry as JSON
//! ```

pub mod doctor;
pub mod feed;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use hawk_pilot::autopilot::ModeRequest;
use hawk_pilot::input::{Key, RemoteKeys, SessionTriggers};
use hawk_pilot::{SharedState, StopSignal};
use hawk_proto::telemetry::FlightTelemetry;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub enable: bool,
    pub bind: String,
    /// Video feed rate
    pub fps: u32,
    pub jpeg_quality: u8,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { enable: true, bind: "0.0.0.0:5001".into(), fps: 15, jpeg_quality: 80 }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    pub keys: Arc<RemoteKeys>,
    pub triggers: Arc<SessionTriggers>,
    pub stop: StopSignal,
    pub fps: u32,
    pub quality: u8,
}

impl AppState {
    pub fn new(
        cfg: &StreamConfig,
        shared: SharedState,
        keys: Arc<RemoteKeys>,
        triggers: Arc<SessionTriggers>,
        stop: StopSignal,
    ) -> Self {
        Self { shared, keys, triggers, stop, fps: cfg.fps, quality: cfg.jpeg_quality.clamp(1, 100) }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/video_feed", get(video_feed))
        .route("/do", post(takeoff))
        .route("/land", post(land))
        .route("/mode/:mode", post(set_mode))
        .route("/keys/:key", post(press_key))
        .route("/status", get(status))
        .with_state(state)
}

pub async fn bind(cfg: &StreamConfig) -> Result<tokio::net::TcpListener> {
    let listener = tokio::net::TcpListener::bind(&cfg.bind)
        .await
        .with_context(|| format!("bind stream server on {}", cfg.bind))?;
    info!("stream: listening on http://{}", listener.local_addr()?);
    Ok(listener)
}

/// Serve until the stop signal fires. Open video feeds end with it.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> Result<()> {
    let stop = state.stop.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { stop.wait().await })
        .await
        .context("stream server")?;
    info!("stream: server stopped");
    Ok(())
}

async fn video_feed(State(st): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, feed::CONTENT_TYPE), (header::CACHE_CONTROL, "no-cache")],
        Body::from_stream(feed::mjpeg_stream(st)),
    )
}

async fn takeoff(State(st): State<AppState>) -> &'static str {
    info!("stream: takeoff requested");
    st.triggers.request_takeoff();
    "Takeoff command sent"
}

async fn land(State(st): State<AppState>) -> &'static str {
    info!("stream: land requested");
    st.triggers.request_land();
    "Land command sent"
}

async fn set_mode(State(st): State<AppState>, Path(mode): Path<String>) -> Result<String, (StatusCode, String)> {
    let req = mode.parse::<ModeRequest>().map_err(|e| bad_request(&e))?;
    st.triggers.request_mode(req);
    Ok(format!("Autopilot {:?} requested", req))
}

async fn press_key(State(st): State<AppState>, Path(key): Path<String>) -> Result<StatusCode, (StatusCode, String)> {
    let key = key.parse::<Key>().map_err(|e| bad_request(&e))?;
    st.keys.press(key);
    Ok(StatusCode::NO_CONTENT)
}

async fn status(State(st): State<AppState>) -> Json<FlightTelemetry> {
    Json(st.shared.telemetry.snapshot().unwrap_or_default())
}

fn bad_request(e: &dyn std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use futures_util::StreamExt;
    use hawk_pilot::input::ManualInput;
    use hawk_proto::telemetry::AutopilotMode;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state() -> AppState {
        AppState::new(
            &StreamConfig { fps: 50, ..Default::default() },
            SharedState::default(),
            Arc::new(RemoteKeys::new(Duration::from_secs(5))),
            Arc::new(SessionTriggers::default()),
            StopSignal::new(),
        )
    }

    async fn call(st: &AppState, method: &str, uri: &str) -> axum::response::Response {
        let req = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
        router(st.clone()).oneshot(req).await.unwrap()
    }

    #[tokio::test]
    async fn takeoff_and_land_set_triggers() {
        let st = state();
        assert_eq!(call(&st, "POST", "/do").await.status(), StatusCode::OK);
        assert!(st.triggers.take_takeoff());
        assert_eq!(call(&st, "POST", "/land").await.status(), StatusCode::OK);
        assert!(st.triggers.land_requested());
        // wrong method
        assert_eq!(call(&st, "GET", "/do").await.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn mode_switch_rejects_chase() {
        let st = state();
        assert_eq!(call(&st, "POST", "/mode/track").await.status(), StatusCode::OK);
        assert_eq!(st.triggers.take_mode(), Some(ModeRequest::Track));
        assert_eq!(call(&st, "POST", "/mode/chase").await.status(), StatusCode::BAD_REQUEST);
        assert_eq!(st.triggers.take_mode(), None);
    }

    #[tokio::test]
    async fn key_press_is_held() {
        let st = state();
        assert_eq!(call(&st, "POST", "/keys/w").await.status(), StatusCode::NO_CONTENT);
        assert!(st.keys.is_pressed(Key::W));
        assert_eq!(call(&st, "POST", "/keys/q").await.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_reports_telemetry() {
        let st = state();
        st.shared.telemetry.publish(FlightTelemetry { mode: AutopilotMode::Search, flying: true, ..Default::default() });
        let resp = call(&st, "GET", "/status").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 1 << 16).await.unwrap();
        let t: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(t["mode"], "search");
        assert_eq!(t["flying"], true);
    }

    #[tokio::test]
    async fn server_stops_with_session() {
        let st = state();
        let cfg = StreamConfig { bind: "127.0.0.1:0".into(), ..Default::default() };
        let listener = bind(&cfg).await.unwrap();
        let server = tokio::spawn(serve(listener, st.clone()));
        st.stop.trigger();
        tokio::time::timeout(Duration::from_secs(2), server).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn video_feed_sends_placeholder_then_ends_on_stop() {
        let st = state();
        let resp = call(&st, "GET", "/video_feed").await;
        assert_eq!(resp.headers()[header::CONTENT_TYPE], feed::CONTENT_TYPE);

        let mut body = resp.into_body().into_data_stream();
        let first = tokio::time::timeout(Duration::from_secs(2), body.next()).await.unwrap().unwrap().unwrap();
        assert!(first.starts_with(b"--frame\r\n"));

        st.stop.trigger();
        let end = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(chunk) = body.next().await {
                chunk.unwrap();
            }
        })
        .await;
        assert!(end.is_ok());
    }
}
