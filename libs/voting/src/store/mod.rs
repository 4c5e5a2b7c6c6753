//! Storage seam for sessions, participants, candidates and votes
//!
//! The voting core never talks to a database directly. Everything goes
//! through [`SessionStore`], which has an in-memory implementation for tests
//! and single-process deployments and a PostgreSQL implementation backed by
//! `sqlx`.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use common::error::DatabaseError;

use crate::models::{CandidateRestaurant, NewSession, Participant, Round, Session, Vote};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgSessionStore;

/// Errors raised by storage implementations
#[derive(Error, Debug)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write
    #[error("Record already exists")]
    Duplicate,

    /// Recording the vote would exceed the like cap
    #[error("Like cap of {cap} reached")]
    CapExceeded { cap: u32 },

    /// A live session already uses the join code
    #[error("Join code {0} is already in use")]
    JoinCodeTaken(String),

    /// A referenced record does not exist
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A stored row could not be decoded
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Type alias for Result with StoreError
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence operations required by the voting core
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a session in `OPEN` status, assigning its id.
    ///
    /// Fails with [`StoreError::JoinCodeTaken`] when a non-expired session
    /// already uses the join code.
    async fn create_session(&self, new_session: NewSession) -> StoreResult<Session>;

    async fn find_session(&self, session_id: i64) -> StoreResult<Option<Session>>;

    /// Find a non-expired session by its normalised join code
    async fn find_by_join_code(&self, join_code: &str) -> StoreResult<Option<Session>>;

    async fn save_session(&self, session: &Session) -> StoreResult<()>;

    /// Sessions that are neither complete nor expired
    async fn list_live_sessions(&self) -> StoreResult<Vec<Session>>;

    /// Fails with [`StoreError::Duplicate`] when the user already participates
    async fn add_participant(&self, participant: &Participant) -> StoreResult<()>;

    async fn find_participant(
        &self,
        session_id: i64,
        user_id: &str,
    ) -> StoreResult<Option<Participant>>;

    /// Participants in join order
    async fn list_participants(&self, session_id: i64) -> StoreResult<Vec<Participant>>;

    /// Insert candidates; rows already present for the same
    /// (session, provider, round) are left untouched.
    async fn insert_candidates(&self, candidates: &[CandidateRestaurant]) -> StoreResult<()>;

    /// Candidates of a round ordered by pool position
    async fn list_candidates(
        &self,
        session_id: i64,
        round: Round,
    ) -> StoreResult<Vec<CandidateRestaurant>>;

    /// Atomically record a vote.
    ///
    /// In one unit of work: reject a second vote for the same
    /// (session, user, restaurant, round) with [`StoreError::Duplicate`],
    /// reject a `LIKE` that would take the user past `like_cap` with
    /// [`StoreError::CapExceeded`], then store the vote and bump the
    /// candidate's like counter.
    async fn record_vote(&self, vote: &Vote, like_cap: u32) -> StoreResult<()>;

    /// `LIKE` votes cast by one user in a round
    async fn count_likes(&self, session_id: i64, user_id: &str, round: Round) -> StoreResult<u32>;

    /// `LIKE` votes per user in a round; users without likes are absent
    async fn likes_by_user(&self, session_id: i64, round: Round)
    -> StoreResult<HashMap<String, u32>>;

    /// `LIKE` votes across both rounds
    async fn count_session_likes(&self, session_id: i64) -> StoreResult<u64>;

    async fn health_check(&self) -> StoreResult<bool>;
}
