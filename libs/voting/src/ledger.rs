//! Vote ledger: validates, records and aggregates votes

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{VotingError, VotingResult};
use crate::models::{Round, Session, SessionStatus, Vote, VoteType};
use crate::store::{SessionStore, StoreError};

/// Live like count of one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TallyEntry {
    pub provider_id: String,
    pub name: String,
    pub position: u32,
    pub like_count: u32,
}

/// Like counts of a round, in pool order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    entries: Vec<TallyEntry>,
}

impl Tally {
    pub fn new(mut entries: Vec<TallyEntry>) -> Self {
        entries.sort_by_key(|entry| entry.position);
        Self { entries }
    }

    pub fn get(&self, provider_id: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|entry| entry.provider_id == provider_id)
            .map(|entry| entry.like_count)
    }

    pub fn total_likes(&self) -> u64 {
        self.entries.iter().map(|entry| u64::from(entry.like_count)).sum()
    }

    pub fn entries(&self) -> &[TallyEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<TallyEntry> {
        self.entries
    }

    /// Entries by like count, highest first; equal counts keep pool order
    pub fn ranked(&self) -> Vec<TallyEntry> {
        let mut ranked = self.entries.clone();
        ranked.sort_by(|a, b| {
            b.like_count
                .cmp(&a.like_count)
                .then(a.position.cmp(&b.position))
        });
        ranked
    }
}

#[derive(Clone)]
pub struct VoteLedger {
    store: Arc<dyn SessionStore>,
}

impl VoteLedger {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Record a vote against the session's running round.
    ///
    /// The store enforces uniqueness and the like cap atomically, so
    /// concurrent submissions of the same vote record it at most once.
    pub async fn record_vote(
        &self,
        session: &Session,
        user_id: &str,
        provider_id: &str,
        round: Round,
        vote_type: VoteType,
    ) -> VotingResult<Vote> {
        let current = match session.status.voting_round() {
            Some(current) => current,
            None if session.status == SessionStatus::Open => {
                return Err(VotingError::VotingNotStarted(session.id));
            }
            None => {
                return Err(VotingError::SessionClosed {
                    session_id: session.id,
                    status: session.status,
                });
            }
        };

        if round != current {
            return Err(VotingError::InvalidRound {
                session_id: session.id,
                submitted: round,
                current,
            });
        }

        if self
            .store
            .find_participant(session.id, user_id)
            .await?
            .is_none()
        {
            return Err(VotingError::NotParticipant {
                session_id: session.id,
                user_id: user_id.to_string(),
            });
        }

        let candidates = self.store.list_candidates(session.id, round).await?;
        if !candidates.iter().any(|c| c.provider_id() == provider_id) {
            return Err(VotingError::RestaurantNotFound {
                provider_id: provider_id.to_string(),
                round,
            });
        }

        let vote = Vote {
            session_id: session.id,
            user_id: user_id.to_string(),
            provider_id: provider_id.to_string(),
            round,
            vote_type,
            created_at: Utc::now(),
        };

        let cap = session.like_cap(round);
        self.store
            .record_vote(&vote, cap)
            .await
            .map_err(|e| match e {
                StoreError::Duplicate => VotingError::DuplicateVote {
                    provider_id: provider_id.to_string(),
                    round,
                },
                StoreError::CapExceeded { cap } => VotingError::CapExceeded { cap, round },
                StoreError::NotFound(_) => VotingError::RestaurantNotFound {
                    provider_id: provider_id.to_string(),
                    round,
                },
                other => VotingError::Storage(other),
            })?;

        debug!(
            "User {} voted {} on {} in session {} round {}",
            user_id, vote_type, provider_id, session.id, round
        );

        Ok(vote)
    }

    /// Likes the user may still cast in `round`
    pub async fn remaining_votes(
        &self,
        session: &Session,
        user_id: &str,
        round: Round,
    ) -> VotingResult<u32> {
        let used = self.store.count_likes(session.id, user_id, round).await?;
        Ok(session.like_cap(round).saturating_sub(used))
    }

    pub async fn likes_by_user(
        &self,
        session_id: i64,
        round: Round,
    ) -> VotingResult<HashMap<String, u32>> {
        Ok(self.store.likes_by_user(session_id, round).await?)
    }

    pub async fn tally(&self, session_id: i64, round: Round) -> VotingResult<Tally> {
        let candidates = self.store.list_candidates(session_id, round).await?;
        Ok(Tally::new(
            candidates
                .into_iter()
                .map(|c| TallyEntry {
                    provider_id: c.details.provider_id,
                    name: c.details.name,
                    position: c.position,
                    like_count: c.like_count,
                })
                .collect(),
        ))
    }

    /// `LIKE` votes cast in both rounds
    pub async fn total_likes(&self, session_id: i64) -> VotingResult<u64> {
        Ok(self.store.count_session_likes(session_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CandidateRestaurant, NewSession, Participant, RestaurantDetails};
    use crate::store::MemoryStore;

    fn entry(provider_id: &str, position: u32, like_count: u32) -> TallyEntry {
        TallyEntry {
            provider_id: provider_id.to_string(),
            name: provider_id.to_uppercase(),
            position,
            like_count,
        }
    }

    async fn voting_session(store: &MemoryStore) -> Session {
        let mut session = store
            .create_session(NewSession {
                join_code: "LEDGER".to_string(),
                host_id: "host".to_string(),
                pool_size: 3,
                round_minutes: 1,
                likes_per_user: 2,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        for user in ["host", "bob"] {
            store
                .add_participant(&Participant {
                    session_id: session.id,
                    user_id: user.to_string(),
                    is_host: user == "host",
                    joined_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let candidates: Vec<_> = ["a", "b", "c"]
            .iter()
            .enumerate()
            .map(|(position, id)| CandidateRestaurant {
                session_id: session.id,
                round: Round::One,
                position: position as u32,
                details: RestaurantDetails::named(*id, id.to_uppercase()),
                like_count: 0,
            })
            .collect();
        store.insert_candidates(&candidates).await.unwrap();

        session.advance(SessionStatus::Round1).unwrap();
        session.begin_round(Round::One, Utc::now());
        store.save_session(&session).await.unwrap();
        session
    }

    #[test]
    fn test_ranked_breaks_ties_by_pool_order() {
        let tally = Tally::new(vec![
            entry("c", 2, 3),
            entry("a", 0, 1),
            entry("b", 1, 3),
            entry("d", 3, 0),
        ]);

        let order: Vec<_> = tally.ranked().into_iter().map(|e| e.provider_id).collect();
        assert_eq!(order, vec!["b", "c", "a", "d"]);
        assert_eq!(tally.total_likes(), 7);
        assert_eq!(tally.get("b"), Some(3));
        assert_eq!(tally.entries()[0].provider_id, "a");
    }

    #[tokio::test]
    async fn test_record_vote_validation() {
        let store = MemoryStore::new();
        let session = voting_session(&store).await;
        let ledger = VoteLedger::new(Arc::new(store.clone()));

        ledger
            .record_vote(&session, "bob", "a", Round::One, VoteType::Like)
            .await
            .unwrap();

        let duplicate = ledger
            .record_vote(&session, "bob", "a", Round::One, VoteType::Like)
            .await;
        assert!(matches!(duplicate, Err(VotingError::DuplicateVote { .. })));

        let stranger = ledger
            .record_vote(&session, "mallory", "b", Round::One, VoteType::Like)
            .await;
        assert!(matches!(stranger, Err(VotingError::NotParticipant { .. })));

        let unknown = ledger
            .record_vote(&session, "bob", "zzz", Round::One, VoteType::Like)
            .await;
        assert!(matches!(unknown, Err(VotingError::RestaurantNotFound { .. })));

        let wrong_round = ledger
            .record_vote(&session, "bob", "b", Round::Two, VoteType::Like)
            .await;
        assert!(matches!(wrong_round, Err(VotingError::InvalidRound { .. })));

        let tally = ledger.tally(session.id, Round::One).await.unwrap();
        assert_eq!(tally.get("a"), Some(1));
        assert_eq!(tally.total_likes(), 1);
    }

    #[tokio::test]
    async fn test_remaining_votes_never_negative() {
        let store = MemoryStore::new();
        let session = voting_session(&store).await;
        let ledger = VoteLedger::new(Arc::new(store.clone()));

        assert_eq!(
            ledger.remaining_votes(&session, "bob", Round::One).await.unwrap(),
            2
        );

        for provider in ["a", "b"] {
            ledger
                .record_vote(&session, "bob", provider, Round::One, VoteType::Like)
                .await
                .unwrap();
        }

        let capped = ledger
            .record_vote(&session, "bob", "c", Round::One, VoteType::Like)
            .await;
        assert!(matches!(capped, Err(VotingError::CapExceeded { cap: 2, .. })));

        // dislikes remain possible after the cap
        ledger
            .record_vote(&session, "bob", "c", Round::One, VoteType::Dislike)
            .await
            .unwrap();

        assert_eq!(
            ledger.remaining_votes(&session, "bob", Round::One).await.unwrap(),
            0
        );
        assert_eq!(
            ledger.likes_by_user(session.id, Round::One).await.unwrap()["bob"],
            2
        );
    }

    #[tokio::test]
    async fn test_votes_rejected_outside_voting() {
        let store = MemoryStore::new();
        let mut session = voting_session(&store).await;
        let ledger = VoteLedger::new(Arc::new(store.clone()));

        session.status = SessionStatus::Open;
        let early = ledger
            .record_vote(&session, "bob", "a", Round::One, VoteType::Like)
            .await;
        assert!(matches!(early, Err(VotingError::VotingNotStarted(_))));

        session.status = SessionStatus::Expired;
        let late = ledger
            .record_vote(&session, "bob", "a", Round::One, VoteType::Like)
            .await;
        assert!(matches!(late, Err(VotingError::SessionClosed { .. })));
    }
}
