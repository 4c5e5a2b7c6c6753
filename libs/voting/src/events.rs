//! Events fanned out to session subscribers
//!
//! Events are serialised as `{"type": "<name>", "payload": {...}}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::TallyEntry;
use crate::models::{Round, SessionStatus};
use crate::rounds::RankedRestaurant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum SessionEvent {
    #[serde(rename_all = "camelCase")]
    SessionStarted {
        session_id: i64,
        start_time: DateTime<Utc>,
        round_ends_at: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    TimerUpdate {
        session_id: i64,
        round: Round,
        millis_left: u64,
    },

    #[serde(rename_all = "camelCase")]
    RoundTransition {
        session_id: i64,
        new_round: Round,
        top_k: Vec<RankedRestaurant>,
    },

    /// Direct reply to a `getRoundStatus` command
    #[serde(rename_all = "camelCase")]
    RoundStatus {
        session_id: i64,
        current_round: Round,
        status: SessionStatus,
        likes_per_user: u32,
        remaining_likes: u32,
    },

    #[serde(rename_all = "camelCase")]
    VoteUpdate {
        session_id: i64,
        round: Round,
        tallies: Vec<TallyEntry>,
    },

    #[serde(rename_all = "camelCase")]
    SessionComplete {
        session_id: i64,
        winner: Option<RankedRestaurant>,
        final_rankings: Vec<RankedRestaurant>,
        total_participants: usize,
        total_votes: u64,
    },

    #[serde(rename_all = "camelCase")]
    SessionExpired {
        session_id: i64,
        reason: String,
        expired_at: DateTime<Utc>,
    },
}

impl SessionEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::SessionStarted { .. } => "sessionStarted",
            SessionEvent::TimerUpdate { .. } => "timerUpdate",
            SessionEvent::RoundTransition { .. } => "roundTransition",
            SessionEvent::RoundStatus { .. } => "roundStatus",
            SessionEvent::VoteUpdate { .. } => "voteUpdate",
            SessionEvent::SessionComplete { .. } => "sessionComplete",
            SessionEvent::SessionExpired { .. } => "sessionExpired",
        }
    }

    pub fn session_id(&self) -> i64 {
        match self {
            SessionEvent::SessionStarted { session_id, .. }
            | SessionEvent::TimerUpdate { session_id, .. }
            | SessionEvent::RoundTransition { session_id, .. }
            | SessionEvent::RoundStatus { session_id, .. }
            | SessionEvent::VoteUpdate { session_id, .. }
            | SessionEvent::SessionComplete { session_id, .. }
            | SessionEvent::SessionExpired { session_id, .. } => *session_id,
        }
    }

    /// Whether no further events follow this one
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            SessionEvent::SessionComplete { .. } | SessionEvent::SessionExpired { .. }
        )
    }
}
