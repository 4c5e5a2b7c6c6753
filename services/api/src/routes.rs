//! API service routes

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tracing::error;
use voting::{CreateSessionRequest, HostCommand, send_host_command};

use crate::{
    error::{ApiError, ApiResult},
    middleware::{AuthUser, auth_middleware},
    models::{CastVoteRequest, RemainingVotesResponse},
    state::AppState,
    ws::session_socket,
};

/// Create the router for the API service
pub fn create_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/join/:code", post(join_session))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/participants", get(get_participants))
        .route("/sessions/:id/restaurants", get(get_restaurants))
        .route(
            "/sessions/:id/restaurants/:provider_id/vote",
            post(cast_vote),
        )
        .route("/sessions/:id/remaining-votes", get(get_remaining_votes))
        .route("/sessions/:id/voting-status", get(get_voting_status))
        .route("/sessions/:id/status", get(get_status))
        .route("/sessions/:id/commands/:command", post(run_command))
        .route("/sessions/:id/ws", get(session_socket))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(protected_routes)
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let storage_ok = match state.engine.health_check().await {
        Ok(healthy) => healthy,
        Err(e) => {
            error!("Storage health check failed: {}", e);
            false
        }
    };

    let status = if storage_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if storage_ok { "ok" } else { "degraded" },
            "service": "api-service",
            "storage": storage_ok,
        })),
    )
}

/// Open a session hosted by the caller
pub async fn create_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<CreateSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    let session = state.engine.create_session(&user.id, payload).await?;

    Ok((StatusCode::CREATED, Json(session)))
}

/// Join by code; repeating the call returns the existing membership
pub async fn join_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(code): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.engine.join_session(&code, &user.id).await?;
    let status = if outcome.newly_joined {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(outcome)))
}

pub async fn get_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.session_view(id, &user.id).await?))
}

pub async fn get_participants(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.participants(id, &user.id).await?))
}

/// Candidates of the current round with their like counts
pub async fn get_restaurants(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.current_restaurants(id, &user.id).await?))
}

pub async fn cast_vote(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((id, provider_id)): Path<(i64, String)>,
    Json(payload): Json<CastVoteRequest>,
) -> ApiResult<impl IntoResponse> {
    let vote = state
        .engine
        .cast_vote(id, &user.id, &provider_id, payload.round, payload.vote_type)
        .await?;

    Ok((StatusCode::CREATED, Json(vote)))
}

pub async fn get_remaining_votes(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let view = state.engine.session_view(id, &user.id).await?;
    let remaining_votes = state.engine.remaining_votes(id, &user.id).await?;

    Ok(Json(RemainingVotesResponse {
        session_id: id,
        round: view.session.round,
        remaining_votes,
    }))
}

pub async fn get_voting_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.voting_status(id, &user.id).await?))
}

/// Polling fallback for clients without a live connection
pub async fn get_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.status_snapshot(id, &user.id).await?))
}

/// Host command over HTTP
pub async fn run_command(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((id, command)): Path<(i64, String)>,
) -> ApiResult<impl IntoResponse> {
    let command: HostCommand = command.parse().map_err(ApiError::from)?;
    let reply = send_host_command(&state.engine, id, &user.id, command).await?;

    Ok(Json(reply))
}
