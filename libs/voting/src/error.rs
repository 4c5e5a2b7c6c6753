//! Error types for the voting core

use thiserror::Error;

use crate::models::{Round, SessionStatus};
use crate::store::StoreError;

/// Errors raised by session, vote and round operations
#[derive(Error, Debug)]
pub enum VotingError {
    #[error("Session {0} not found")]
    SessionNotFound(i64),

    #[error("No open session uses join code {0}")]
    JoinCodeNotFound(String),

    #[error("Invalid join code: {0}")]
    InvalidJoinCode(String),

    #[error("User {user_id} is not a participant of session {session_id}")]
    NotParticipant { session_id: i64, user_id: String },

    #[error("Only the host may {action} session {session_id}")]
    NotHost {
        session_id: i64,
        action: &'static str,
    },

    #[error("Restaurant {provider_id} is not a round {round} candidate")]
    RestaurantNotFound { provider_id: String, round: Round },

    #[error("Already voted for restaurant {provider_id} in round {round}")]
    DuplicateVote { provider_id: String, round: Round },

    #[error("Like cap of {cap} reached for round {round}")]
    CapExceeded { cap: u32, round: Round },

    #[error("Vote targets round {submitted} but session {session_id} is voting in round {current}")]
    InvalidRound {
        session_id: i64,
        submitted: Round,
        current: Round,
    },

    #[error("Voting has not started in session {0}")]
    VotingNotStarted(i64),

    #[error("Session {session_id} already transitioned (status {status})")]
    AlreadyTransitioned {
        session_id: i64,
        status: SessionStatus,
    },

    #[error("Session {session_id} is {status} and accepts no further changes")]
    SessionClosed {
        session_id: i64,
        status: SessionStatus,
    },

    #[error("Invalid session configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown session command: {0}")]
    UnknownCommand(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl VotingError {
    /// Stable machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            VotingError::SessionNotFound(_) => "sessionNotFound",
            VotingError::JoinCodeNotFound(_) => "joinCodeNotFound",
            VotingError::InvalidJoinCode(_) => "invalidJoinCode",
            VotingError::NotParticipant { .. } => "notParticipant",
            VotingError::NotHost { .. } => "notHost",
            VotingError::RestaurantNotFound { .. } => "restaurantNotFound",
            VotingError::DuplicateVote { .. } => "duplicateVote",
            VotingError::CapExceeded { .. } => "capExceeded",
            VotingError::InvalidRound { .. } => "invalidRound",
            VotingError::VotingNotStarted(_) => "votingNotStarted",
            VotingError::AlreadyTransitioned { .. } => "alreadyTransitioned",
            VotingError::SessionClosed { .. } => "sessionClosed",
            VotingError::InvalidConfig(_) => "invalidConfig",
            VotingError::UnknownCommand(_) => "unknownCommand",
            VotingError::Storage(_) => "storage",
        }
    }
}

/// Type alias for Result with VotingError
pub type VotingResult<T> = Result<T, VotingError>;
