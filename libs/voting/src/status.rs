//! Voting status aggregation

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::VotingResult;
use crate::ledger::VoteLedger;
use crate::models::{Round, Session};
use crate::store::SessionStore;

/// Whether everyone has used up their likes in the current round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingStatus {
    pub all_votes_in: bool,
    pub total_participants: usize,
    pub participants_with_no_votes_left: usize,
    pub total_votes_cast: u64,
    pub total_possible_votes: u64,
    pub current_round: Round,
}

/// Read-only view over the ledger and session state; safe to poll
#[derive(Clone)]
pub struct VotingStatusAggregator {
    store: Arc<dyn SessionStore>,
    ledger: VoteLedger,
}

impl VotingStatusAggregator {
    pub fn new(store: Arc<dyn SessionStore>, ledger: VoteLedger) -> Self {
        Self { store, ledger }
    }

    pub async fn voting_status(&self, session: &Session) -> VotingResult<VotingStatus> {
        let round = session.round;
        let cap = session.like_cap(round);

        let participants = self.store.list_participants(session.id).await?;
        let likes = self.ledger.likes_by_user(session.id, round).await?;

        let exhausted = participants
            .iter()
            .filter(|p| likes.get(&p.user_id).copied().unwrap_or(0) >= cap)
            .count();
        let total_votes_cast: u64 = participants
            .iter()
            .map(|p| u64::from(likes.get(&p.user_id).copied().unwrap_or(0)))
            .sum();

        Ok(VotingStatus {
            all_votes_in: exhausted == participants.len(),
            total_participants: participants.len(),
            participants_with_no_votes_left: exhausted,
            total_votes_cast,
            total_possible_votes: participants.len() as u64 * u64::from(cap),
            current_round: round,
        })
    }
}
