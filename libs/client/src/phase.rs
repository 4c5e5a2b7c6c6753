//! What the participant screen should show

use voting::{Round, SessionEvent, SessionStatus, StatusSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    WaitingForHost,
    RoundInProgress { round: Round, remaining_likes: u32 },
    /// Everyone used their likes; the host may close the round early
    AllVotesIn { round: Round },
    Complete,
    Expired,
}

impl SessionPhase {
    pub fn derive(snapshot: &StatusSnapshot) -> Self {
        match snapshot.status {
            SessionStatus::Open => SessionPhase::WaitingForHost,
            SessionStatus::Round1 | SessionStatus::Round2 if snapshot.voting.all_votes_in => {
                SessionPhase::AllVotesIn {
                    round: snapshot.current_round,
                }
            }
            SessionStatus::Round1 | SessionStatus::Round2 => SessionPhase::RoundInProgress {
                round: snapshot.current_round,
                remaining_likes: snapshot.remaining_votes,
            },
            SessionStatus::Complete => SessionPhase::Complete,
            SessionStatus::Expired => SessionPhase::Expired,
        }
    }

    /// Phase after a live event, when the event alone decides it
    pub fn after_event(&self, event: &SessionEvent, likes_per_user: u32) -> Self {
        match event {
            SessionEvent::SessionStarted { .. } => SessionPhase::RoundInProgress {
                round: Round::One,
                remaining_likes: likes_per_user,
            },
            SessionEvent::RoundTransition { new_round, .. } => SessionPhase::RoundInProgress {
                round: *new_round,
                remaining_likes: voting::models::ROUND_TWO_LIKE_CAP,
            },
            SessionEvent::RoundStatus {
                current_round,
                status,
                remaining_likes,
                ..
            } if status.voting_round().is_some() => SessionPhase::RoundInProgress {
                round: *current_round,
                remaining_likes: *remaining_likes,
            },
            SessionEvent::SessionComplete { .. } => SessionPhase::Complete,
            SessionEvent::SessionExpired { .. } => SessionPhase::Expired,
            _ => *self,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, SessionPhase::Complete | SessionPhase::Expired)
    }

    pub fn banner(&self) -> &'static str {
        match self {
            SessionPhase::WaitingForHost => "Waiting for the host to start",
            SessionPhase::RoundInProgress { .. } => "Voting in progress",
            SessionPhase::AllVotesIn { .. } => "All votes are in, waiting for the host",
            SessionPhase::Complete => "Voting complete",
            SessionPhase::Expired => "This session has expired",
        }
    }
}
