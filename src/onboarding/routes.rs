//! REST + WebSocket surface for seller onboarding.
//!
//! The upstream identity gateway authenticates the caller and forwards the
//! seller id in the `x-seller-id` header. WebSocket clients that cannot set
//! headers pass `?seller_id=` instead.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        DefaultBodyLimit, Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::manager::OnboardingService;
use super::model::{Category, SellerProfile};
use super::validation::FileUpload;
use crate::error::{OnboardingError, StoreError};
use crate::identity::{SellerSession, SessionContext};

/// Header carrying the authenticated seller id.
pub const SELLER_ID_HEADER: &str = "x-seller-id";
/// Optional header carrying the seller's email.
pub const SELLER_EMAIL_HEADER: &str = "x-seller-email";
/// Header carrying the original file name of an upload.
pub const FILE_NAME_HEADER: &str = "x-file-name";

/// Shared state for onboarding routes.
#[derive(Clone)]
pub struct OnboardingRouteState {
    pub service: Arc<OnboardingService>,
}

/// Build the onboarding REST and WebSocket routes.
pub fn onboarding_routes(service: Arc<OnboardingService>) -> Router {
    // Leave headroom over the document limit so oversize files reach
    // validation and get a descriptive error instead of a bare 413.
    let body_limit = service.config().max_file_size.saturating_mul(2);
    let state = OnboardingRouteState { service };

    Router::new()
        .route("/health", get(health))
        .route("/ws/onboarding", get(ws_handler))
        .route("/api/sellers", post(register_seller))
        .route("/api/onboarding/destination", get(destination))
        .route("/api/onboarding/status", get(status))
        .route("/api/onboarding/steps", get(steps))
        .route("/api/onboarding/next", post(next_step))
        .route("/api/onboarding/previous", post(previous_step))
        .route(
            "/api/onboarding/documents/{category}",
            put(upload_document).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route(
            "/api/onboarding/documents/{category}/upload",
            delete(cancel_upload),
        )
        .route(
            "/api/onboarding/documents/{category}/persist",
            post(retry_persistence),
        )
        .route("/api/onboarding/submit", post(submit))
        .with_state(state)
}

// ── Session + errors ────────────────────────────────────────────────────

fn session_from(headers: &HeaderMap) -> SessionContext {
    let Some(seller_id) = header_str(headers, SELLER_ID_HEADER).filter(|s| !s.is_empty()) else {
        return SessionContext::anonymous();
    };
    let mut session = SellerSession::new(seller_id);
    if let Some(email) = header_str(headers, SELLER_EMAIL_HEADER) {
        session = session.with_email(email);
    }
    SessionContext::signed_in(session)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}

fn status_for(err: &OnboardingError) -> StatusCode {
    match err {
        OnboardingError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        OnboardingError::Unauthenticated => StatusCode::UNAUTHORIZED,
        OnboardingError::UploadFailed { .. } => StatusCode::BAD_GATEWAY,
        OnboardingError::UploadCancelled { .. } => StatusCode::CONFLICT,
        OnboardingError::Persistence { .. } => StatusCode::SERVICE_UNAVAILABLE,
        OnboardingError::NothingToPersist { .. } => StatusCode::NOT_FOUND,
        OnboardingError::IncompleteSubmission { .. } => StatusCode::CONFLICT,
        OnboardingError::StoreUnavailable(StoreError::AlreadyExists { .. }) => StatusCode::CONFLICT,
        OnboardingError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn error_response(err: OnboardingError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!(status = %status, error = %err, "Onboarding request failed");
    } else {
        debug!(status = %status, error = %err, "Onboarding request rejected");
    }

    let mut body = serde_json::json!({
        "error": err.to_string(),
        "retryable": err.is_retryable(),
    });
    match &err {
        OnboardingError::IncompleteSubmission { missing } => {
            body["missing"] = serde_json::json!(missing);
        }
        OnboardingError::Persistence { category, record, .. } => {
            body["category"] = serde_json::json!(category);
            body["document"] = serde_json::json!(record);
        }
        OnboardingError::UploadFailed { category, .. }
        | OnboardingError::UploadCancelled { category }
        | OnboardingError::NothingToPersist { category } => {
            body["category"] = serde_json::json!(category);
        }
        _ => {}
    }
    (status, Json(body)).into_response()
}

fn parse_category(raw: &str) -> Result<Category, Response> {
    raw.parse::<Category>().map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": e})),
        )
            .into_response()
    })
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "seller-onboard"
    }))
}

// ── REST Endpoints ──────────────────────────────────────────────────────

async fn register_seller(
    State(state): State<OnboardingRouteState>,
    headers: HeaderMap,
    Json(profile): Json<SellerProfile>,
) -> Response {
    match state
        .service
        .register_seller(&session_from(&headers), profile)
        .await
    {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn destination(State(state): State<OnboardingRouteState>, headers: HeaderMap) -> Response {
    match state.service.destination(&session_from(&headers)).await {
        Ok(destination) => Json(serde_json::json!({ "destination": destination })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn status(State(state): State<OnboardingRouteState>, headers: HeaderMap) -> Response {
    match state.service.snapshot(&session_from(&headers)).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => error_response(e),
    }
}

async fn steps(State(state): State<OnboardingRouteState>) -> impl IntoResponse {
    Json(state.service.steps())
}

async fn next_step(State(state): State<OnboardingRouteState>, headers: HeaderMap) -> Response {
    match state.service.next(&session_from(&headers)).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => error_response(e),
    }
}

async fn previous_step(State(state): State<OnboardingRouteState>, headers: HeaderMap) -> Response {
    match state.service.previous(&session_from(&headers)).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => error_response(e),
    }
}

async fn upload_document(
    State(state): State<OnboardingRouteState>,
    Path(category): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let category = match parse_category(&category) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let media_type = header_str(&headers, header::CONTENT_TYPE.as_str()).unwrap_or_default();
    let file_name = header_str(&headers, FILE_NAME_HEADER).unwrap_or("document");
    let file = FileUpload::new(file_name, media_type, body.to_vec());

    let session = session_from(&headers);
    match state.service.upload(&session, category, file).await {
        Ok(record) => match state.service.completion_percent(&session).await {
            Ok(completion) => Json(serde_json::json!({
                "category": category,
                "document": record,
                "completion_percent": completion,
            }))
            .into_response(),
            Err(e) => error_response(e),
        },
        Err(e) => error_response(e),
    }
}

async fn cancel_upload(
    State(state): State<OnboardingRouteState>,
    Path(category): Path<String>,
    headers: HeaderMap,
) -> Response {
    let category = match parse_category(&category) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match state
        .service
        .cancel_upload(&session_from(&headers), category)
        .await
    {
        Ok(true) => Json(serde_json::json!({"status": "cancelled"})).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "No upload in progress"})),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn retry_persistence(
    State(state): State<OnboardingRouteState>,
    Path(category): Path<String>,
    headers: HeaderMap,
) -> Response {
    let category = match parse_category(&category) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match state
        .service
        .retry_persistence(&session_from(&headers), category)
        .await
    {
        Ok(record) => Json(serde_json::json!({
            "category": category,
            "document": record,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn submit(State(state): State<OnboardingRouteState>, headers: HeaderMap) -> Response {
    match state
        .service
        .submit_for_verification(&session_from(&headers))
        .await
    {
        Ok(receipt) => Json(receipt).into_response(),
        Err(e) => error_response(e),
    }
}

// ── WebSocket ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct WsParams {
    seller_id: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<OnboardingRouteState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> Response {
    let mut session = session_from(&headers);
    if session.session().is_none() {
        if let Some(id) = params.seller_id.filter(|s| !s.is_empty()) {
            session = SessionContext::signed_in(SellerSession::new(id));
        }
    }
    if let Err(e) = session.require() {
        return error_response(e);
    }

    info!("Onboarding WebSocket client connecting");
    ws.on_upgrade(move |socket| handle_socket(socket, state.service, session))
}

/// Send the current snapshot as a `sync` message. Returns false once the
/// client is gone.
async fn send_sync(
    socket: &mut WebSocket,
    service: &OnboardingService,
    session: &SessionContext,
) -> bool {
    let snapshot = match service.snapshot(session).await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Could not load onboarding snapshot for WS sync");
            return true;
        }
    };
    let msg = serde_json::json!({"type": "sync", "snapshot": snapshot});
    socket
        .send(Message::Text(msg.to_string().into()))
        .await
        .is_ok()
}

async fn handle_socket(
    mut socket: WebSocket,
    service: Arc<OnboardingService>,
    session: SessionContext,
) {
    // Subscribe before the initial sync so no event falls in between.
    let mut rx = service.subscribe();
    let Ok(seller_id) = session.require().cloned() else {
        return;
    };
    info!(seller_id = %seller_id, "Onboarding WebSocket client connected");

    if !send_sync(&mut socket, &service, &session).await {
        warn!("Failed to send initial sync, client disconnected");
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if event.seller_id() != &seller_id {
                            continue;
                        }
                        if let Ok(json) = serde_json::to_string(&event) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                debug!("Client disconnected during send");
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind onboarding events");
                        if !send_sync(&mut socket, &service, &session).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Onboarding event channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(seller_id = %seller_id, "Onboarding WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("Onboarding WebSocket connection closed");
}
