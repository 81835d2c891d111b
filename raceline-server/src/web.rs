//! HTTP and WebSocket delivery of replays.

use axum::{
    body::Bytes,
    debug_handler,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use futures::StreamExt;
use log::{debug, trace, warn};
use serde::Deserialize;
use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};
use thiserror::Error;
use tokio::{net::TcpListener, sync::broadcast};
use tokio_graceful_shutdown::SubsystemHandle;

use raceline_core::{Command, ErrorKind, RaceId, ReplayError, ReplayOptions};

use crate::replay::{FrameStream, ReplayEvent, ReplayService};

const REPLAYS_URI: &str = "/v1/api/races/{race_id}/replays";
const TRACK_SHAPE_URI: &str = "/v1/api/races/{race_id}/trackShape";
const REPLAY_URI: &str = "/v1/api/replays/{session_id}";
const REPLAY_CONTROL_URI: &str = "/v1/api/replays/{session_id}/control";
const REPLAY_FRAMES_URI: &str = "/v1/api/replays/{session_id}/frames";
const CONFIG_URI: &str = "/v1/api/config";

#[derive(Error, Debug)]
pub enum WebError {
    #[error("Socket operation failed")]
    Io(#[from] io::Error),
}

/// [`ReplayError`] as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub ReplayError);

impl From<ReplayError> for ApiError {
    fn from(e: ReplayError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidParameter => StatusCode::BAD_REQUEST,
            ErrorKind::InvalidState => StatusCode::CONFLICT,
            ErrorKind::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Cancelled => StatusCode::GONE,
            ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
        };
        (status, self.0.to_string()).into_response()
    }
}

#[derive(Clone)]
pub struct Web {
    service: Arc<ReplayService>,
    port: u16,
    shutdown_tx: broadcast::Sender<()>,
}

impl Web {
    pub fn new(service: Arc<ReplayService>, port: u16) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Web {
            service,
            port,
            shutdown_tx,
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(REPLAYS_URI, post(open_replay_handler))
            .route(TRACK_SHAPE_URI, get(track_shape_handler))
            .route(REPLAY_URI, get(replay_status_handler).delete(close_replay_handler))
            .route(REPLAY_CONTROL_URI, put(replay_control_handler))
            .route(REPLAY_FRAMES_URI, get(frames_handler))
            .route(CONFIG_URI, get(config_handler))
            .layer(middleware::from_fn(no_cache_middleware))
            .with_state(self.clone())
    }

    /// Stop open frame sockets
    pub fn shutdown_sockets(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), WebError> {
        let listener =
            TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.port))
                .await?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let app = self.router();

        log::info!("Starting HTTP web server on port {}", self.port);

        let result = tokio::select! { biased;
            _ = subsys.on_shutdown_requested() => {
                self.shutdown_sockets();
                Ok(())
            },
            r = axum::serve(listener, app)
                    .with_graceful_shutdown(
                        async move {
                            _ = shutdown_rx.recv().await;
                        }
                    ) => {
                r.map_err(WebError::Io)
            }
        };

        self.service.shutdown().await;
        result
    }
}

/// Middleware to add no-cache headers to API responses
async fn no_cache_middleware(request: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    response
}

// =============================================================================
// REST handlers
// =============================================================================

/// POST /v1/api/races/{race_id}/replays
///
/// The body is an optional [`ReplayOptions`] object.
#[debug_handler]
async fn open_replay_handler(
    State(state): State<Web>,
    Path(race_id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let options: ReplayOptions = if body.iter().all(u8::is_ascii_whitespace) {
        ReplayOptions::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ReplayError::InvalidParameter {
            name: "options",
            reason: e.to_string(),
        })?
    };
    debug!("Open replay of {} with {:?}", race_id, options);

    let info = state.service.open_replay(&RaceId::new(race_id), &options).await?;
    Ok((StatusCode::CREATED, Json(info)).into_response())
}

#[debug_handler]
async fn replay_status_handler(
    State(state): State<Web>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    Ok(Json(state.service.status(&session_id)?).into_response())
}

#[debug_handler]
async fn replay_control_handler(
    State(state): State<Web>,
    Path(session_id): Path<String>,
    Json(command): Json<Command>,
) -> Result<Response, ApiError> {
    debug!("PUT control {:?} on {}", command, session_id);
    Ok(Json(state.service.control(&session_id, &command)?).into_response())
}

#[debug_handler]
async fn close_replay_handler(
    State(state): State<Web>,
    Path(session_id): Path<String>,
) -> StatusCode {
    state.service.close(&session_id);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackShapeQuery {
    decimate_factor: Option<usize>,
    /// Map the outline into the unit square
    #[serde(default)]
    normalized: bool,
}

#[debug_handler]
async fn track_shape_handler(
    State(state): State<Web>,
    Path(race_id): Path<String>,
    Query(query): Query<TrackShapeQuery>,
) -> Result<Response, ApiError> {
    let factor = query
        .decimate_factor
        .unwrap_or(state.service.config().decimate_factor);
    let shape = state
        .service
        .track_shape(&RaceId::new(race_id), factor)
        .await?;

    if query.normalized {
        if let Some(bounds) = shape.bounds() {
            return Ok(Json(shape.normalized(&bounds)).into_response());
        }
    }
    Ok(Json(shape).into_response())
}

#[debug_handler]
async fn config_handler(State(state): State<Web>) -> Response {
    Json(state.service.config().clone()).into_response()
}

// =============================================================================
// Frame websocket
// =============================================================================

#[debug_handler]
async fn frames_handler(
    State(state): State<Web>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    debug!("frames request for {}", session_id);

    match state.service.subscribe(&session_id) {
        Ok(frames) => {
            let shutdown_rx = state.shutdown_tx.subscribe();
            let service = state.service.clone();
            let failed_service = state.service.clone();
            let failed_id = session_id.clone();
            ws.on_failed_upgrade(move |e| {
                warn!("{}: websocket upgrade failed: {}", failed_id, e);
                failed_service.close(&failed_id);
            })
            .on_upgrade(move |socket| frames_stream(socket, service, session_id, frames, shutdown_rx))
        }
        Err(e) => ApiError(e).into_response(),
    }
}

/// Forward replay events to the client and client commands to the session.
/// The session is closed when the socket goes away.
async fn frames_stream(
    mut socket: WebSocket,
    service: Arc<ReplayService>,
    session_id: String,
    mut frames: FrameStream,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    debug!("Started frames websocket for {}", session_id);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Shutdown of frames websocket");
                break;
            },
            event = frames.next() => {
                let Some(event) = event else {
                    break;
                };
                let last = matches!(event, ReplayEvent::Closed);
                match serde_json::to_string(&event) {
                    Ok(message) => {
                        if let Err(e) = socket.send(Message::Text(message.into())).await {
                            warn!("Error on send to websocket: {}", e);
                            break;
                        }
                        trace!("Sent {:?} to {}", event_name(&event), session_id);
                    }
                    Err(e) => log::error!("Cannot serialize replay event: {}", e),
                }
                if last {
                    break;
                }
            },
            r = socket.recv() => {
                match r {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Command>(text.as_str()) {
                            Ok(command) => {
                                debug!("Received {:?} for {}", command, session_id);
                                if let Err(e) = service.control(&session_id, &command) {
                                    let reply = serde_json::json!({
                                        "type": "error",
                                        "message": e.to_string(),
                                    });
                                    if socket.send(Message::Text(reply.to_string().into())).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(e) => warn!("Unknown command '{}': {}", text.as_str(), e),
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Frames websocket closed by client");
                        break;
                    },
                    Some(Ok(message)) => {
                        debug!("Dropping unexpected message {:?}", message);
                    },
                    Some(Err(e)) => {
                        warn!("Error reading websocket: {}", e);
                        break;
                    }
                }
            }
        }
    }

    service.close(&session_id);
}

fn event_name(event: &ReplayEvent) -> &'static str {
    match event {
        ReplayEvent::Frame(_) => "frame",
        ReplayEvent::EndOfRace => "endOfRace",
        ReplayEvent::Closed => "closed",
    }
}
