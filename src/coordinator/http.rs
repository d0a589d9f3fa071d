//! HTTP surface of the coordinator.
//!
//! | Method | Path | Success | Errors |
//! |--------|------|---------|--------|
//! | `POST` | `/missions` | 202 `{"mission_id"}` | 400 bad body, 500 queue |
//! | `GET` | `/missions/{id}` | 200 `{"mission_id","status"}` | 404 |
//! | `POST` | `/tokens/issue` | 200 `{"token","expires_in"}` | 400 |
//! | `POST` | `/tokens/renew` | 200 `{"token","expires_in"}` | 401 |
//! | `GET` | `/health` | 200 `ok` | |

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::service::CoordinatorService;
use crate::constants::{ISSUE_TOKEN_PATH, RENEW_TOKEN_PATH};
use crate::error::{Error, Result};
use crate::types::{
    IssueTokenRequest, MissionStatusResponse, SubmitMissionRequest, SubmitMissionResponse,
    TokenResponse,
};

/// Builds the coordinator router.
pub fn router(service: CoordinatorService) -> Router {
    Router::new()
        .route("/missions", post(submit_mission))
        .route("/missions/{id}", get(get_mission))
        .route(ISSUE_TOKEN_PATH, post(issue_token))
        .route(RENEW_TOKEN_PATH, post(renew_token))
        .route("/health", get(health))
        .with_state(service)
}

/// Binds `addr` and serves `router` until `cancel` fires.
pub async fn serve(router: Router, addr: SocketAddr, cancel: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Transport(format!("failed to bind {}: {}", addr, e)))?;
    serve_listener(listener, router, cancel).await
}

/// Serves `router` on an already bound listener until `cancel` fires.
pub async fn serve_listener(
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Coordinator API listening on http://{}", addr);
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| Error::Transport(format!("HTTP server failed: {}", e)))?;
    tracing::info!("Coordinator API stopped");
    Ok(())
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            err if err.is_unauthorized() => StatusCode::UNAUTHORIZED,
            Error::InvalidRequest(_) | Error::Malformed(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn submit_mission(
    State(service): State<CoordinatorService>,
    body: std::result::Result<Json<SubmitMissionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitMissionResponse>)> {
    let Json(request) = body.map_err(|e| Error::invalid_request(e.body_text()))?;
    let mission = service.submit(&request.payload).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitMissionResponse {
            mission_id: mission.id,
        }),
    ))
}

async fn get_mission(
    State(service): State<CoordinatorService>,
    Path(id): Path<String>,
) -> Result<Json<MissionStatusResponse>> {
    let mission = service.mission(&id)?;
    Ok(Json(MissionStatusResponse {
        mission_id: mission.id,
        status: mission.status,
    }))
}

async fn issue_token(
    State(service): State<CoordinatorService>,
    body: std::result::Result<Json<IssueTokenRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>> {
    let Json(request) = body.map_err(|e| Error::invalid_request(e.body_text()))?;
    Ok(Json(service.issue_token(&request.identity)?))
}

async fn renew_token(
    State(service): State<CoordinatorService>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>> {
    let bearer = bearer_token(&headers)
        .ok_or_else(|| Error::unauthorized("missing bearer token"))?;
    Ok(Json(service.renew_token(bearer)?))
}

async fn health() -> &'static str {
    "ok"
}

/// Extracts the credential from an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
