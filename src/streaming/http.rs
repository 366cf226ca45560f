//! The web control plane (§6): an `axum::Router` serving the index page,
//! config/status JSON, the event/movie index, per-slot MJPEG/MPEG-TS/JPEG
//! streams, and the in-memory log, built on the usual
//! `AppState`+`Router::new().with_state(state)` shape. The MJPEG stream
//! pulls from the Streaming Hub's `snapshot_jpeg` on a timer rather than
//! pushing over a broadcast channel, since frames originate on a
//! per-camera OS thread, not inside the tokio runtime.

use super::hub::StreamingHub;
use super::{ConsumerKind, SlotTag};
use crate::action::{ActionDispatch, ActionToken};
use crate::auth::{check_auth, AuthOutcome, LockoutTracker};
use crate::config::Config;
use crate::db::MetadataStore;
use crate::encoder;
use crate::logbuf::LogRingBuffer;
use axum::body::Body;
use axum::extract::{ConnectInfo, Form, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tower_http::trace::TraceLayer;

const MJPEG_BOUNDARY: &str = "motionplus-frame-boundary";

pub struct AppState {
    pub config: RwLock<Config>,
    pub hubs: HashMap<u32, Arc<StreamingHub>>,
    pub metadata: Arc<MetadataStore>,
    pub logbuf: Arc<LogRingBuffer>,
    pub actions: Mutex<ActionDispatch>,
    pub lockout: Arc<LockoutTracker>,
    pub started_at: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: Config,
        hubs: HashMap<u32, Arc<StreamingHub>>,
        metadata: Arc<MetadataStore>,
        logbuf: Arc<LogRingBuffer>,
        actions: ActionDispatch,
        lockout: Arc<LockoutTracker>,
    ) -> Self {
        AppState {
            config: RwLock::new(config),
            hubs,
            metadata,
            logbuf,
            actions: Mutex::new(actions),
            lockout,
            started_at: std::time::Instant::now(),
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/0/config.json", get(config_json_handler))
        .route("/0/config", post(config_set_handler))
        .route("/0/status.json", get(status_json_handler))
        .route("/0/action", post(action_handler))
        .route("/0/log", get(log_handler))
        .route("/:id/movies.json", get(movies_json_handler))
        .route("/:id/movies/:name", get(movie_file_handler))
        .route("/:id/mjpg/:slot", get(mjpg_handler))
        .route("/:id/mpegts/:slot", get(mpegts_handler))
        .route("/:id/static/:slot", get(static_snapshot_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn authorize(state: &AppState, headers: &HeaderMap, peer_key: &str) -> Result<(), StatusCode> {
    let now = std::time::Instant::now();
    if state.lockout.is_locked(peer_key, now) {
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }
    let general = state.config.read().unwrap().general.clone();
    let header = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    match check_auth(&general, header) {
        AuthOutcome::Allowed => {
            state.lockout.record_success(peer_key);
            Ok(())
        }
        AuthOutcome::Denied | AuthOutcome::LockedOut => {
            state.lockout.record_failure(peer_key, now);
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

async fn index_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if let Err(code) = authorize(&state, &headers, &addr.ip().to_string()) {
        return code.into_response();
    }
    let cameras = state.config.read().unwrap().cameras.clone();
    let mut body = String::from("<html><head><title>MotionPlus</title></head><body><h1>MotionPlus</h1><ul>");
    for cam in &cameras {
        body.push_str(&format!(
            "<li><a href=\"/{id}/mjpg/stream\">{name} ({id})</a></li>",
            id = cam.device_id,
            name = cam.name
        ));
    }
    body.push_str("</ul></body></html>");
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], body).into_response()
}

async fn config_json_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if let Err(code) = authorize(&state, &headers, &addr.ip().to_string()) {
        return code.into_response();
    }
    let cfg = state.config.read().unwrap().clone();
    axum::Json(cfg).into_response()
}

async fn config_set_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Form(fields): Form<HashMap<String, String>>,
) -> Response {
    if let Err(code) = authorize(&state, &headers, &addr.ip().to_string()) {
        return code.into_response();
    }
    let mut cfg = state.config.write().unwrap();
    for (key, value) in fields {
        match key.as_str() {
            "log_level" => {
                if let Ok(v) = value.parse() {
                    cfg.general.log_level = v;
                }
            }
            "stream_quality" => {
                if let Ok(v) = value.parse() {
                    cfg.general.stream_quality = v;
                }
            }
            "stream_maxrate" => {
                if let Ok(v) = value.parse() {
                    cfg.general.stream_maxrate = v;
                }
            }
            _ => {}
        }
    }
    StatusCode::OK.into_response()
}

#[derive(serde::Serialize)]
struct CameraStatus {
    device_id: u32,
    name: String,
    consumers: HashMap<&'static str, bool>,
}

#[derive(serde::Serialize)]
struct StatusResponse {
    uptime_secs: u64,
    cameras: Vec<CameraStatus>,
}

async fn status_json_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if let Err(code) = authorize(&state, &headers, &addr.ip().to_string()) {
        return code.into_response();
    }
    let cameras = state.config.read().unwrap().cameras.clone();
    let statuses: Vec<CameraStatus> = cameras
        .iter()
        .map(|cam| {
            let mut consumers = HashMap::new();
            if let Some(hub) = state.hubs.get(&cam.device_id) {
                consumers.insert("stream", hub.slot(SlotTag::Full).has_consumers());
            }
            CameraStatus {
                device_id: cam.device_id,
                name: cam.name.clone(),
                consumers,
            }
        })
        .collect();
    axum::Json(StatusResponse {
        uptime_secs: state.started_at.elapsed().as_secs(),
        cameras: statuses,
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
struct ActionForm {
    command: String,
    camid: u32,
    #[allow(dead_code)]
    user: Option<String>,
}

async fn action_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Form(form): Form<ActionForm>,
) -> Response {
    if let Err(code) = authorize(&state, &headers, &addr.ip().to_string()) {
        return code.into_response();
    }
    let Some(token) = ActionToken::parse(&form.command) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let actions = state.actions.lock().unwrap();
    match actions.dispatch(token, form.camid) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn log_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if let Err(code) = authorize(&state, &headers, &addr.ip().to_string()) {
        return code.into_response();
    }
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], state.logbuf.render_text()).into_response()
}

async fn movies_json_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<u32>,
) -> Response {
    if let Err(code) = authorize(&state, &headers, &addr.ip().to_string()) {
        return code.into_response();
    }
    axum::Json(state.metadata.movies(id)).into_response()
}

async fn movie_file_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path((id, name)): Path<(u32, String)>,
) -> Response {
    if let Err(code) = authorize(&state, &headers, &addr.ip().to_string()) {
        return code.into_response();
    }
    let Some(path) = state.metadata.movie_path(id, &name) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "video/mp4")], bytes).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

fn hub_for<'a>(state: &'a AppState, id: u32) -> Option<&'a Arc<StreamingHub>> {
    state.hubs.get(&id)
}

async fn mjpg_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path((id, slot)): Path<(u32, String)>,
) -> Response {
    if let Err(code) = authorize(&state, &headers, &addr.ip().to_string()) {
        return code.into_response();
    }
    let (Some(hub), Some(tag)) = (hub_for(&state, id), SlotTag::from_url_segment(&slot)) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let hub = hub.clone();
    hub.slot(tag).acquire(ConsumerKind::Jpeg);
    let quality = state.config.read().unwrap().general.stream_quality;
    let maxrate = state.config.read().unwrap().general.stream_maxrate.max(1);
    let period = Duration::from_millis(1000 / maxrate as u64);

    let guard = SlotReleaseGuard { hub: hub.clone(), tag, kind: ConsumerKind::Jpeg };
    let body_stream = stream::unfold((hub, tag, quality, guard), move |(hub, tag, quality, guard)| async move {
        tokio::time::sleep(period).await;
        let jpeg = hub.slot(tag).snapshot_jpeg(quality)?;
        let part = format!(
            "--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            jpeg.len()
        );
        let mut bytes = Vec::with_capacity(part.len() + jpeg.len() + 2);
        bytes.extend_from_slice(part.as_bytes());
        bytes.extend_from_slice(&jpeg);
        bytes.extend_from_slice(b"\r\n");
        Some((Ok::<_, std::io::Error>(axum::body::Bytes::from(bytes)), (hub, tag, quality, guard)))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}"))
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .body(Body::from_stream(body_stream))
        .unwrap()
}

/// Releases the consumer count when the streaming body future is dropped
/// (client disconnect), matching the Stream Slot's acquire/release
/// lifetime (§4.6).
struct SlotReleaseGuard {
    hub: Arc<StreamingHub>,
    tag: SlotTag,
    kind: ConsumerKind,
}

impl Drop for SlotReleaseGuard {
    fn drop(&mut self) {
        self.hub.slot(self.tag).release(self.kind);
    }
}

async fn mpegts_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path((id, slot)): Path<(u32, String)>,
) -> Response {
    if let Err(code) = authorize(&state, &headers, &addr.ip().to_string()) {
        return code.into_response();
    }
    let (Some(hub), Some(tag)) = (hub_for(&state, id), SlotTag::from_url_segment(&slot)) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    hub.slot(tag).acquire(ConsumerKind::Ts);
    let Some(image) = hub.slot(tag).latest_image() else {
        hub.slot(tag).release(ConsumerKind::Ts);
        return StatusCode::NOT_FOUND.into_response();
    };
    hub.slot(tag).release(ConsumerKind::Ts);

    let jpeg = match encoder::encode_jpeg(&image, 75) {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    let mut handle = encoder::mux_movie(encoder::Container::Mpg, encoder::VideoCodec::H264);
    if handle.write_sample(&jpeg).is_err() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    match handle.finish() {
        Ok(bytes) => ([(header::CONTENT_TYPE, "video/mp2t")], bytes).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn static_snapshot_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path((id, slot)): Path<(u32, String)>,
) -> Response {
    if let Err(code) = authorize(&state, &headers, &addr.ip().to_string()) {
        return code.into_response();
    }
    let (Some(hub), Some(tag)) = (hub_for(&state, id), SlotTag::from_url_segment(&slot)) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    hub.slot(tag).acquire(ConsumerKind::Jpeg);
    let quality = state.config.read().unwrap().general.stream_quality;
    let jpeg = hub.slot(tag).snapshot_jpeg(quality);
    hub.slot(tag).release(ConsumerKind::Jpeg);
    match jpeg {
        Some(bytes) => ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionDispatch;
    use crate::config::Config;
    use tower::ServiceExt;

    fn empty_state() -> Arc<AppState> {
        Arc::new(AppState::new(
            Config::default(),
            HashMap::new(),
            Arc::new(MetadataStore::new(std::env::temp_dir())),
            Arc::new(LogRingBuffer::new(16)),
            ActionDispatch::new(),
            Arc::new(LockoutTracker::new(3, 10)),
        ))
    }

    fn peer() -> ConnectInfo<SocketAddr> {
        ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4242)))
    }

    #[tokio::test]
    async fn index_route_serves_html_without_auth() {
        let app = build_router(empty_state());
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/")
                    .extension(peer())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_slot_returns_404() {
        let app = build_router(empty_state());
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/1/static/bogus")
                    .extension(peer())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_action_command_is_bad_request() {
        let app = build_router(empty_state());
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/0/action")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .extension(peer())
                    .body(Body::from("command=not_a_real_token&camid=1"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn repeated_failed_logins_lock_out_the_peer_by_ip() {
        let state = Arc::new(AppState::new(
            Config::default(),
            HashMap::new(),
            Arc::new(MetadataStore::new(std::env::temp_dir())),
            Arc::new(LogRingBuffer::new(16)),
            ActionDispatch::new(),
            Arc::new(LockoutTracker::new(1, 10)),
        ));
        state.config.write().unwrap().general.webcontrol_auth = crate::config::AuthMode::Basic;
        let app = build_router(state);

        let bad_auth = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/0/status.json")
                    .extension(peer())
                    .header(header::AUTHORIZATION, "Basic bm9wZTpub3Blcw==")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(bad_auth.status(), StatusCode::UNAUTHORIZED);

        let locked = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/0/status.json")
                    .extension(peer())
                    .header(header::AUTHORIZATION, "Basic bm9wZTpub3Blcw==")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(locked.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
