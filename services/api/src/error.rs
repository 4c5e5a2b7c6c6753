//! Custom error types for the API service

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use voting::VotingError;

/// Custom error type for the API service
#[derive(Error, Debug)]
pub enum ApiError {
    /// Missing or invalid bearer token
    #[error("Unauthorized")]
    Unauthorized,

    /// Rejected session or vote operation
    #[error(transparent)]
    Voting(#[from] VotingError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Voting(e) => voting_status(e),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::Voting(e) => e.kind(),
        }
    }

    /// Message safe to show a client; storage failures are logged and masked
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Voting(VotingError::Storage(e)) => {
                error!("Storage failure: {}", e);
                "Storage error".to_string()
            }
            other => other.to_string(),
        }
    }
}

fn voting_status(error: &VotingError) -> StatusCode {
    match error {
        VotingError::SessionNotFound(_)
        | VotingError::JoinCodeNotFound(_)
        | VotingError::RestaurantNotFound { .. } => StatusCode::NOT_FOUND,
        VotingError::NotParticipant { .. } | VotingError::NotHost { .. } => StatusCode::FORBIDDEN,
        VotingError::DuplicateVote { .. }
        | VotingError::CapExceeded { .. }
        | VotingError::InvalidRound { .. }
        | VotingError::VotingNotStarted(_)
        | VotingError::AlreadyTransitioned { .. } => StatusCode::CONFLICT,
        VotingError::SessionClosed { .. } => StatusCode::GONE,
        VotingError::InvalidConfig(_)
        | VotingError::InvalidJoinCode(_)
        | VotingError::UnknownCommand(_) => StatusCode::BAD_REQUEST,
        VotingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.public_message(),
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;
