//! In-memory session store
//!
//! Every operation runs under a single lock, which gives the same atomicity
//! the PostgreSQL store gets from transactions and unique constraints.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{SessionStore, StoreError, StoreResult};
use crate::models::{
    CandidateRestaurant, NewSession, Participant, Round, Session, SessionStatus, Vote, VoteType,
};

type VoteKey = (i64, String, String, Round);

#[derive(Debug, Default)]
struct MemoryState {
    next_session_id: i64,
    sessions: BTreeMap<i64, Session>,
    participants: HashMap<i64, Vec<Participant>>,
    candidates: HashMap<(i64, Round), Vec<CandidateRestaurant>>,
    votes: HashMap<VoteKey, Vote>,
}

/// Session store kept in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored votes, all sessions included
    pub async fn vote_count(&self) -> usize {
        self.state.lock().await.votes.len()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, new_session: NewSession) -> StoreResult<Session> {
        let mut state = self.state.lock().await;

        let taken = state.sessions.values().any(|session| {
            session.status != SessionStatus::Expired && session.join_code == new_session.join_code
        });
        if taken {
            return Err(StoreError::JoinCodeTaken(new_session.join_code));
        }

        state.next_session_id += 1;
        let session = Session {
            id: state.next_session_id,
            join_code: new_session.join_code,
            host_id: new_session.host_id,
            pool_size: new_session.pool_size,
            round_minutes: new_session.round_minutes,
            likes_per_user: new_session.likes_per_user,
            round: Round::One,
            status: SessionStatus::Open,
            created_at: new_session.created_at,
            last_activity_at: new_session.created_at,
            round_started_at: None,
            round_ends_at: None,
        };
        state.sessions.insert(session.id, session.clone());

        Ok(session)
    }

    async fn find_session(&self, session_id: i64) -> StoreResult<Option<Session>> {
        Ok(self.state.lock().await.sessions.get(&session_id).cloned())
    }

    async fn find_by_join_code(&self, join_code: &str) -> StoreResult<Option<Session>> {
        let state = self.state.lock().await;
        let session = state
            .sessions
            .values()
            .find(|s| s.status != SessionStatus::Expired && s.join_code == join_code)
            .cloned();

        Ok(session)
    }

    async fn save_session(&self, session: &Session) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        match state.sessions.get_mut(&session.id) {
            Some(stored) => {
                *stored = session.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("session {}", session.id))),
        }
    }

    async fn list_live_sessions(&self) -> StoreResult<Vec<Session>> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .values()
            .filter(|s| !s.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn add_participant(&self, participant: &Participant) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if !state.sessions.contains_key(&participant.session_id) {
            return Err(StoreError::NotFound(format!(
                "session {}",
                participant.session_id
            )));
        }

        let members = state.participants.entry(participant.session_id).or_default();
        if members.iter().any(|p| p.user_id == participant.user_id) {
            return Err(StoreError::Duplicate);
        }
        members.push(participant.clone());

        Ok(())
    }

    async fn find_participant(
        &self,
        session_id: i64,
        user_id: &str,
    ) -> StoreResult<Option<Participant>> {
        let state = self.state.lock().await;
        Ok(state
            .participants
            .get(&session_id)
            .and_then(|members| members.iter().find(|p| p.user_id == user_id))
            .cloned())
    }

    async fn list_participants(&self, session_id: i64) -> StoreResult<Vec<Participant>> {
        let state = self.state.lock().await;
        Ok(state.participants.get(&session_id).cloned().unwrap_or_default())
    }

    async fn insert_candidates(&self, candidates: &[CandidateRestaurant]) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        for candidate in candidates {
            let round = state
                .candidates
                .entry((candidate.session_id, candidate.round))
                .or_default();
            if round
                .iter()
                .any(|c| c.provider_id() == candidate.provider_id())
            {
                continue;
            }
            round.push(candidate.clone());
            round.sort_by_key(|c| c.position);
        }

        Ok(())
    }

    async fn list_candidates(
        &self,
        session_id: i64,
        round: Round,
    ) -> StoreResult<Vec<CandidateRestaurant>> {
        let state = self.state.lock().await;
        Ok(state
            .candidates
            .get(&(session_id, round))
            .cloned()
            .unwrap_or_default())
    }

    async fn record_vote(&self, vote: &Vote, like_cap: u32) -> StoreResult<()> {
        let mut state = self.state.lock().await;

        let key = (
            vote.session_id,
            vote.user_id.clone(),
            vote.provider_id.clone(),
            vote.round,
        );
        if state.votes.contains_key(&key) {
            return Err(StoreError::Duplicate);
        }

        if vote.vote_type == VoteType::Like {
            let likes = state
                .votes
                .values()
                .filter(|v| {
                    v.session_id == vote.session_id
                        && v.user_id == vote.user_id
                        && v.round == vote.round
                        && v.vote_type == VoteType::Like
                })
                .count() as u32;
            if likes >= like_cap {
                return Err(StoreError::CapExceeded { cap: like_cap });
            }

            let candidate = state
                .candidates
                .get_mut(&(vote.session_id, vote.round))
                .and_then(|round| {
                    round
                        .iter_mut()
                        .find(|c| c.provider_id() == vote.provider_id)
                })
                .ok_or_else(|| StoreError::NotFound(format!("restaurant {}", vote.provider_id)))?;
            candidate.like_count += 1;
        }

        state.votes.insert(key, vote.clone());
        Ok(())
    }

    async fn count_likes(&self, session_id: i64, user_id: &str, round: Round) -> StoreResult<u32> {
        let state = self.state.lock().await;
        Ok(state
            .votes
            .values()
            .filter(|v| {
                v.session_id == session_id
                    && v.user_id == user_id
                    && v.round == round
                    && v.vote_type == VoteType::Like
            })
            .count() as u32)
    }

    async fn likes_by_user(
        &self,
        session_id: i64,
        round: Round,
    ) -> StoreResult<HashMap<String, u32>> {
        let state = self.state.lock().await;
        let mut likes: HashMap<String, u32> = HashMap::new();
        for vote in state.votes.values().filter(|v| {
            v.session_id == session_id && v.round == round && v.vote_type == VoteType::Like
        }) {
            *likes.entry(vote.user_id.clone()).or_default() += 1;
        }

        Ok(likes)
    }

    async fn count_session_likes(&self, session_id: i64) -> StoreResult<u64> {
        let state = self.state.lock().await;
        Ok(state
            .votes
            .values()
            .filter(|v| v.session_id == session_id && v.vote_type == VoteType::Like)
            .count() as u64)
    }

    async fn health_check(&self) -> StoreResult<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RestaurantDetails;
    use chrono::Utc;

    async fn seeded_store() -> (MemoryStore, Session) {
        let store = MemoryStore::new();
        let session = store
            .create_session(NewSession {
                join_code: "QWE234".to_string(),
                host_id: "host".to_string(),
                pool_size: 2,
                round_minutes: 1,
                likes_per_user: 1,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let candidates: Vec<_> = ["a", "b"]
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

        (store, session)
    }

    fn vote(session_id: i64, provider: &str, vote_type: VoteType) -> Vote {
        Vote {
            session_id,
            user_id: "alice".to_string(),
            provider_id: provider.to_string(),
            round: Round::One,
            vote_type,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_join_code_unique_among_live_sessions() {
        let (store, mut session) = seeded_store().await;
        let new_session = NewSession {
            join_code: "QWE234".to_string(),
            host_id: "other".to_string(),
            pool_size: 2,
            round_minutes: 1,
            likes_per_user: 1,
            created_at: Utc::now(),
        };

        let err = store.create_session(new_session.clone()).await.unwrap_err();
        assert!(matches!(err, StoreError::JoinCodeTaken(_)));

        session.status = SessionStatus::Expired;
        store.save_session(&session).await.unwrap();
        assert!(store.create_session(new_session).await.is_ok());
    }

    #[tokio::test]
    async fn test_record_vote_enforces_uniqueness_and_cap() {
        let (store, session) = seeded_store().await;

        store
            .record_vote(&vote(session.id, "a", VoteType::Like), 1)
            .await
            .unwrap();

        let duplicate = store
            .record_vote(&vote(session.id, "a", VoteType::Dislike), 1)
            .await;
        assert!(matches!(duplicate, Err(StoreError::Duplicate)));

        let over_cap = store
            .record_vote(&vote(session.id, "b", VoteType::Like), 1)
            .await;
        assert!(matches!(over_cap, Err(StoreError::CapExceeded { cap: 1 })));

        // dislikes never count against the cap
        store
            .record_vote(&vote(session.id, "b", VoteType::Dislike), 1)
            .await
            .unwrap();

        let candidates = store.list_candidates(session.id, Round::One).await.unwrap();
        assert_eq!(candidates[0].like_count, 1);
        assert_eq!(candidates[1].like_count, 0);
        assert_eq!(store.vote_count().await, 2);
    }

    #[tokio::test]
    async fn test_insert_candidates_keeps_existing_rows() {
        let (store, session) = seeded_store().await;
        store
            .record_vote(&vote(session.id, "a", VoteType::Like), 1)
            .await
            .unwrap();

        let again = store.list_candidates(session.id, Round::One).await.unwrap();
        store.insert_candidates(&again).await.unwrap();

        let candidates = store.list_candidates(session.id, Round::One).await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].like_count, 1);
    }
}
