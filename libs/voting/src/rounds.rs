//! Round controller: seeds round one, carries finalists into round two and
//! picks the winner.
//!
//! Every ranking in a session uses the same order: like count descending,
//! then position in the original round-one pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use crate::broadcaster::Broadcaster;
use crate::config::TopKPolicy;
use crate::error::{VotingError, VotingResult};
use crate::events::SessionEvent;
use crate::ledger::{Tally, TallyEntry, VoteLedger};
use crate::models::{CandidateRestaurant, RestaurantDetails, Round, Session, SessionStatus};
use crate::store::SessionStore;

/// A restaurant's standing in a ranking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedRestaurant {
    pub provider_id: String,
    pub name: String,
    pub position: u32,
    /// Likes in the round the ranking was computed for
    pub like_count: u32,
    pub round1_votes: u32,
    pub round2_votes: u32,
}

/// Result of the final round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOutcome {
    pub winner: Option<RankedRestaurant>,
    pub final_rankings: Vec<RankedRestaurant>,
    pub total_participants: usize,
    pub total_votes: u64,
}

/// The `k` best entries of a tally
pub fn select_top_k(tally: &Tally, k: usize) -> Vec<TallyEntry> {
    tally.ranked().into_iter().take(k).collect()
}

#[derive(Clone)]
pub struct RoundController {
    store: Arc<dyn SessionStore>,
    ledger: VoteLedger,
    broadcaster: Broadcaster,
    policy: TopKPolicy,
}

impl RoundController {
    pub fn new(
        store: Arc<dyn SessionStore>,
        ledger: VoteLedger,
        broadcaster: Broadcaster,
        policy: TopKPolicy,
    ) -> Self {
        Self {
            store,
            ledger,
            broadcaster,
            policy,
        }
    }

    /// Seed the round-one candidates of an open session.
    ///
    /// Duplicate provider ids keep their first occurrence and the pool is
    /// cut to the session's pool size. Returns the seeded candidates.
    pub async fn begin_round1(
        &self,
        session: &mut Session,
        pool: Vec<RestaurantDetails>,
    ) -> VotingResult<Vec<CandidateRestaurant>> {
        if session.status != SessionStatus::Open {
            return Err(VotingError::AlreadyTransitioned {
                session_id: session.id,
                status: session.status,
            });
        }

        let mut seen = HashSet::new();
        let candidates: Vec<_> = pool
            .into_iter()
            .filter(|details| seen.insert(details.provider_id.clone()))
            .take(session.pool_size as usize)
            .enumerate()
            .map(|(position, details)| CandidateRestaurant {
                session_id: session.id,
                round: Round::One,
                position: position as u32,
                details,
                like_count: 0,
            })
            .collect();

        self.store.insert_candidates(&candidates).await?;

        if session.round != Round::One {
            session.round = Round::One;
            self.store.save_session(session).await?;
        }

        info!(
            "Seeded {} restaurant(s) for session {}",
            candidates.len(),
            session.id
        );
        Ok(candidates)
    }

    /// Close round one and open round two with the top-K finalists.
    ///
    /// Fails with [`VotingError::AlreadyTransitioned`] unless the session is
    /// voting in round one. The caller serialises calls per session.
    pub async fn complete_round1(
        &self,
        session: &mut Session,
        now: DateTime<Utc>,
    ) -> VotingResult<Vec<RankedRestaurant>> {
        if session.status != SessionStatus::Round1 || session.round != Round::One {
            return Err(VotingError::AlreadyTransitioned {
                session_id: session.id,
                status: session.status,
            });
        }

        let candidates = self.store.list_candidates(session.id, Round::One).await?;
        let participants = self.store.list_participants(session.id).await?.len();
        let tally = self.ledger.tally(session.id, Round::One).await?;

        let k = self.policy.finalist_count(participants, candidates.len());
        let finalists = select_top_k(&tally, k);

        let carried: Vec<_> = finalists
            .iter()
            .filter_map(|entry| {
                candidates
                    .iter()
                    .find(|c| c.provider_id() == entry.provider_id)
            })
            .map(|c| c.carry_forward(Round::Two))
            .collect();
        self.store.insert_candidates(&carried).await?;

        let mut next = session.clone();
        next.advance(SessionStatus::Round2)?;
        next.begin_round(Round::Two, now);
        next.touch(now);
        self.store.save_session(&next).await?;
        *session = next;

        let top_k: Vec<_> = finalists
            .into_iter()
            .map(|entry| RankedRestaurant {
                provider_id: entry.provider_id,
                name: entry.name,
                position: entry.position,
                like_count: entry.like_count,
                round1_votes: entry.like_count,
                round2_votes: 0,
            })
            .collect();

        info!(
            "Session {} advanced to round 2 with {} finalist(s)",
            session.id,
            top_k.len()
        );
        self.broadcaster.publish(
            session.id,
            SessionEvent::RoundTransition {
                session_id: session.id,
                new_round: Round::Two,
                top_k: top_k.clone(),
            },
        );

        Ok(top_k)
    }

    /// Close round two and complete the session.
    ///
    /// The winner is the best-ranked round-two candidate; `None` only when
    /// round two has no candidates at all.
    pub async fn complete_round2(
        &self,
        session: &mut Session,
        now: DateTime<Utc>,
    ) -> VotingResult<SessionOutcome> {
        if session.status != SessionStatus::Round2 || session.round != Round::Two {
            return Err(VotingError::AlreadyTransitioned {
                session_id: session.id,
                status: session.status,
            });
        }

        let round_one = self.ledger.tally(session.id, Round::One).await?;
        let round_two = self.ledger.tally(session.id, Round::Two).await?;

        let final_rankings: Vec<_> = round_two
            .ranked()
            .into_iter()
            .map(|entry| RankedRestaurant {
                round1_votes: round_one.get(&entry.provider_id).unwrap_or(0),
                round2_votes: entry.like_count,
                provider_id: entry.provider_id,
                name: entry.name,
                position: entry.position,
                like_count: entry.like_count,
            })
            .collect();

        let outcome = SessionOutcome {
            winner: final_rankings.first().cloned(),
            final_rankings,
            total_participants: self.store.list_participants(session.id).await?.len(),
            total_votes: self.ledger.total_likes(session.id).await?,
        };

        let mut next = session.clone();
        next.advance(SessionStatus::Complete)?;
        next.touch(now);
        self.store.save_session(&next).await?;
        *session = next;

        info!(
            "Session {} complete, winner: {}",
            session.id,
            outcome
                .winner
                .as_ref()
                .map(|w| w.name.as_str())
                .unwrap_or("none")
        );
        self.broadcaster.publish(
            session.id,
            SessionEvent::SessionComplete {
                session_id: session.id,
                winner: outcome.winner.clone(),
                final_rankings: outcome.final_rankings.clone(),
                total_participants: outcome.total_participants,
                total_votes: outcome.total_votes,
            },
        );

        Ok(outcome)
    }
}
