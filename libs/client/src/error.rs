//! Error types for the session client

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered, but refused the request
    #[error("Server rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// A vote was reported for a restaurant that has no pending vote
    #[error("No pending vote for restaurant {0}")]
    UnknownVote(String),

    #[error("Vote for restaurant {0} is already pending or confirmed")]
    AlreadyVoted(String),

    #[error("No likes left in this round")]
    NoLikesLeft,
}

impl ClientError {
    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Http(_) => true,
            ClientError::Rejected { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
