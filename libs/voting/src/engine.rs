//! Session state machine
//!
//! [`SessionEngine`] owns every status change of a session. All transitions
//! and votes of one session run under that session's lock, so a host
//! command racing the round timer produces exactly one transition. Each
//! voting round owns a [`RoundTimer`]; the timer is dropped, and therefore
//! cancelled, whenever the round ends or the session reaches a terminal
//! status.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info};

use crate::broadcaster::{Broadcaster, Subscription};
use crate::config::VotingConfig;
use crate::error::{VotingError, VotingResult};
use crate::events::SessionEvent;
use crate::joincode;
use crate::ledger::VoteLedger;
use crate::models::{
    CandidateRestaurant, NewSession, Participant, RestaurantDetails, Round, Session,
    SessionStatus, Vote, VoteType,
};
use crate::rounds::RoundController;
use crate::status::{VotingStatus, VotingStatusAggregator};
use crate::store::{SessionStore, StoreError};
use crate::timer::RoundTimer;

const JOIN_CODE_ATTEMPTS: usize = 10;

pub const REASON_ENDED_BY_HOST: &str = "ended by host";
pub const REASON_INACTIVE: &str = "inactive";
pub const REASON_MAX_DURATION: &str = "maximum session duration reached";

/// Host request to open a new session
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub pool_size: Option<u32>,
    pub round_minutes: Option<u32>,
    pub likes_per_user: Option<u32>,
    #[serde(default)]
    pub restaurants: Vec<RestaurantDetails>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinOutcome {
    pub session: Session,
    pub participant: Participant,
    /// `false` when the user had already joined
    pub newly_joined: bool,
}

/// A session as seen by one of its participants
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    #[serde(flatten)]
    pub session: Session,
    pub is_host: bool,
    pub participant_count: usize,
    pub millis_left: Option<u64>,
}

/// Everything a polling client needs to resynchronise
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub session_id: i64,
    pub status: SessionStatus,
    pub current_round: Round,
    pub millis_left: Option<u64>,
    pub voting: VotingStatus,
    pub remaining_votes: u32,
    /// Last change to the session; clients use it to detect stale state
    pub last_updated: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
enum Trigger {
    Host(String),
    Timer,
}

#[derive(Default)]
struct SessionRuntime {
    timer: Option<RoundTimer>,
}

struct EngineInner {
    store: Arc<dyn SessionStore>,
    ledger: VoteLedger,
    rounds: RoundController,
    broadcaster: Broadcaster,
    aggregator: VotingStatusAggregator,
    config: VotingConfig,
    // Lock order: this map is only held briefly and never while waiting on
    // a session lock.
    runtimes: Mutex<HashMap<i64, Arc<Mutex<SessionRuntime>>>>,
}

/// Cheaply cloneable handle to the session state machine
#[derive(Clone)]
pub struct SessionEngine {
    inner: Arc<EngineInner>,
}

impl SessionEngine {
    pub fn new(store: Arc<dyn SessionStore>, config: VotingConfig) -> Self {
        let broadcaster = Broadcaster::new(config.channel_capacity);
        let ledger = VoteLedger::new(store.clone());
        let rounds = RoundController::new(
            store.clone(),
            ledger.clone(),
            broadcaster.clone(),
            config.top_k,
        );
        let aggregator = VotingStatusAggregator::new(store.clone(), ledger.clone());

        Self {
            inner: Arc::new(EngineInner {
                store,
                ledger,
                rounds,
                broadcaster,
                aggregator,
                config,
                runtimes: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.inner.broadcaster
    }

    pub fn config(&self) -> &VotingConfig {
        &self.inner.config
    }

    pub async fn health_check(&self) -> VotingResult<bool> {
        Ok(self.inner.store.health_check().await?)
    }

    /// Create a session hosted by `host_id` and seed its round-one pool
    pub async fn create_session(
        &self,
        host_id: &str,
        request: CreateSessionRequest,
    ) -> VotingResult<Session> {
        let config = &self.inner.config;
        let pool_size = config.pool_size.resolve("poolSize", request.pool_size)?;
        let round_minutes = config
            .round_minutes
            .resolve("roundMinutes", request.round_minutes)?;
        let likes_per_user = config
            .likes_per_user
            .resolve("likesPerUser", request.likes_per_user)?;

        if request.restaurants.is_empty() {
            return Err(VotingError::InvalidConfig(
                "at least one restaurant is required".to_string(),
            ));
        }

        let now = Utc::now();
        let mut created = None;
        let mut last_error = None;
        for _ in 0..JOIN_CODE_ATTEMPTS {
            let new_session = NewSession {
                join_code: joincode::generate(),
                host_id: host_id.to_string(),
                pool_size,
                round_minutes,
                likes_per_user,
                created_at: now,
            };

            match self.inner.store.create_session(new_session).await {
                Ok(session) => {
                    created = Some(session);
                    break;
                }
                Err(StoreError::JoinCodeTaken(code)) => {
                    debug!("Join code {} collided, retrying", code);
                    last_error = Some(StoreError::JoinCodeTaken(code));
                }
                Err(e) => return Err(e.into()),
            }
        }

        let Some(mut session) = created else {
            return Err(last_error
                .map(VotingError::from)
                .unwrap_or_else(|| VotingError::InvalidConfig("no join code available".into())));
        };

        self.inner
            .store
            .add_participant(&Participant {
                session_id: session.id,
                user_id: host_id.to_string(),
                is_host: true,
                joined_at: now,
            })
            .await?;

        self.inner
            .rounds
            .begin_round1(&mut session, request.restaurants)
            .await?;

        info!(
            "Session {} created by {} with join code {}",
            session.id, host_id, session.join_code
        );
        Ok(session)
    }

    /// Join by code. Joining a session twice returns the existing membership.
    pub async fn join_session(&self, code: &str, user_id: &str) -> VotingResult<JoinOutcome> {
        let code = joincode::normalize(code)?;
        let found = self
            .inner
            .store
            .find_by_join_code(&code)
            .await?
            .ok_or_else(|| VotingError::JoinCodeNotFound(code.clone()))?;

        let (_runtime, mut session) = self.lock_session(found.id).await?;
        if session.status.is_terminal() {
            return Err(VotingError::SessionClosed {
                session_id: session.id,
                status: session.status,
            });
        }

        if let Some(participant) = self.inner.store.find_participant(session.id, user_id).await? {
            return Ok(JoinOutcome {
                session,
                participant,
                newly_joined: false,
            });
        }

        let now = Utc::now();
        let participant = Participant {
            session_id: session.id,
            user_id: user_id.to_string(),
            is_host: false,
            joined_at: now,
        };
        self.inner.store.add_participant(&participant).await?;

        session.touch(now);
        self.inner.store.save_session(&session).await?;

        info!("User {} joined session {}", user_id, session.id);
        Ok(JoinOutcome {
            session,
            participant,
            newly_joined: true,
        })
    }

    pub async fn session_view(&self, session_id: i64, user_id: &str) -> VotingResult<SessionView> {
        let session = self.participant_session(session_id, user_id).await?;
        let participant_count = self.inner.store.list_participants(session_id).await?.len();

        Ok(SessionView {
            is_host: session.is_host(user_id),
            millis_left: session.millis_left(Utc::now()),
            participant_count,
            session,
        })
    }

    pub async fn participants(
        &self,
        session_id: i64,
        user_id: &str,
    ) -> VotingResult<Vec<Participant>> {
        self.participant_session(session_id, user_id).await?;
        Ok(self.inner.store.list_participants(session_id).await?)
    }

    /// Candidates of the session's current round with live like counts
    pub async fn current_restaurants(
        &self,
        session_id: i64,
        user_id: &str,
    ) -> VotingResult<Vec<CandidateRestaurant>> {
        let session = self.participant_session(session_id, user_id).await?;
        Ok(self
            .inner
            .store
            .list_candidates(session_id, session.round)
            .await?)
    }

    /// Host command: open round one and start its timer
    pub async fn start_session(&self, session_id: i64, user_id: &str) -> VotingResult<Session> {
        let (mut runtime, session) = self.lock_session(session_id).await?;
        require_host(&session, user_id, "start")?;

        let now = Utc::now();
        let mut next = session.clone();
        next.advance(SessionStatus::Round1)?;
        next.begin_round(Round::One, now);
        next.touch(now);
        self.inner.store.save_session(&next).await?;

        info!("Session {} started by host", session_id);
        self.inner.broadcaster.publish(
            session_id,
            SessionEvent::SessionStarted {
                session_id,
                start_time: now,
                round_ends_at: next.round_ends_at.unwrap_or(now),
            },
        );
        runtime.timer = Some(self.start_timer(&next, next.round_duration()));

        Ok(next)
    }

    /// Host command: close round one before its timer runs out
    pub async fn complete_round1(&self, session_id: i64, user_id: &str) -> VotingResult<Session> {
        self.complete_round(session_id, Round::One, Trigger::Host(user_id.to_string()))
            .await
    }

    /// Host command: close round two before its timer runs out
    pub async fn complete_round2(&self, session_id: i64, user_id: &str) -> VotingResult<Session> {
        self.complete_round(session_id, Round::Two, Trigger::Host(user_id.to_string()))
            .await
    }

    /// Host command: abandon the session
    pub async fn end_session(&self, session_id: i64, user_id: &str) -> VotingResult<Session> {
        let (mut runtime, session) = self.lock_session(session_id).await?;
        require_host(&session, user_id, "end")?;

        self.expire_locked(&mut runtime, session, REASON_ENDED_BY_HOST, Utc::now())
            .await
    }

    pub async fn cast_vote(
        &self,
        session_id: i64,
        user_id: &str,
        provider_id: &str,
        round: Round,
        vote_type: VoteType,
    ) -> VotingResult<Vote> {
        let (_runtime, mut session) = self.lock_session(session_id).await?;

        let vote = self
            .inner
            .ledger
            .record_vote(&session, user_id, provider_id, round, vote_type)
            .await?;

        session.touch(vote.created_at);
        self.inner.store.save_session(&session).await?;

        let tally = self.inner.ledger.tally(session_id, round).await?;
        self.inner.broadcaster.publish(
            session_id,
            SessionEvent::VoteUpdate {
                session_id,
                round,
                tallies: tally.into_entries(),
            },
        );

        Ok(vote)
    }

    /// Likes the caller may still cast in the current round
    pub async fn remaining_votes(&self, session_id: i64, user_id: &str) -> VotingResult<u32> {
        let session = self.participant_session(session_id, user_id).await?;
        self.inner
            .ledger
            .remaining_votes(&session, user_id, session.round)
            .await
    }

    pub async fn voting_status(&self, session_id: i64, user_id: &str) -> VotingResult<VotingStatus> {
        let session = self.participant_session(session_id, user_id).await?;
        self.inner.aggregator.voting_status(&session).await
    }

    /// Answer to a `getRoundStatus` command
    pub async fn round_status(&self, session_id: i64, user_id: &str) -> VotingResult<SessionEvent> {
        let session = self.participant_session(session_id, user_id).await?;
        let remaining_likes = self
            .inner
            .ledger
            .remaining_votes(&session, user_id, session.round)
            .await?;

        Ok(SessionEvent::RoundStatus {
            session_id,
            current_round: session.round,
            status: session.status,
            likes_per_user: session.like_cap(session.round),
            remaining_likes,
        })
    }

    /// Synchronous fallback for clients without a live event channel
    pub async fn status_snapshot(
        &self,
        session_id: i64,
        user_id: &str,
    ) -> VotingResult<StatusSnapshot> {
        let session = self.participant_session(session_id, user_id).await?;
        let voting = self.inner.aggregator.voting_status(&session).await?;
        let remaining_votes = self
            .inner
            .ledger
            .remaining_votes(&session, user_id, session.round)
            .await?;
        let now = Utc::now();

        Ok(StatusSnapshot {
            session_id,
            status: session.status,
            current_round: session.round,
            millis_left: session.millis_left(now),
            voting,
            remaining_votes,
            last_updated: session.last_activity_at,
            generated_at: now,
        })
    }

    /// Register a participant connection for the session's events
    pub async fn subscribe(&self, session_id: i64, user_id: &str) -> VotingResult<Subscription> {
        let session = self.participant_session(session_id, user_id).await?;
        if session.status.is_terminal() {
            return Err(VotingError::SessionClosed {
                session_id,
                status: session.status,
            });
        }

        Ok(self.inner.broadcaster.subscribe(session_id))
    }

    /// Expire a session unless it already reached a terminal status.
    ///
    /// Returns whether the session was expired by this call.
    pub async fn expire_session(&self, session_id: i64, reason: &str) -> VotingResult<bool> {
        let (mut runtime, session) = self.lock_session(session_id).await?;
        if session.status.is_terminal() {
            return Ok(false);
        }

        self.expire_locked(&mut runtime, session, reason, Utc::now())
            .await?;
        Ok(true)
    }

    /// Expire every live session that has been inactive or open for too
    /// long at `now`. Returns the ids of the expired sessions.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> VotingResult<Vec<i64>> {
        let mut expired = Vec::new();

        for candidate in self.inner.store.list_live_sessions().await? {
            if self.expiry_reason(&candidate, now).is_none() {
                continue;
            }

            let (mut runtime, session) = match self.lock_session(candidate.id).await {
                Ok(locked) => locked,
                Err(e) => {
                    error!("Failed to load session {} for expiry: {}", candidate.id, e);
                    continue;
                }
            };
            // activity may have happened while waiting for the lock
            let Some(reason) = self.expiry_reason(&session, now) else {
                continue;
            };
            if session.status.is_terminal() {
                continue;
            }

            match self.expire_locked(&mut runtime, session, reason, now).await {
                Ok(_) => expired.push(candidate.id),
                Err(e) => error!("Failed to expire session {}: {}", candidate.id, e),
            }
        }

        if !expired.is_empty() {
            info!("Expired {} stale session(s)", expired.len());
        }
        Ok(expired)
    }

    /// Restart round timers of sessions that were voting when the process
    /// last stopped. Rounds whose deadline already passed advance at once.
    pub async fn resume_timers(&self) -> VotingResult<usize> {
        let now = Utc::now();
        let mut resumed = 0;

        for session in self.inner.store.list_live_sessions().await? {
            if session.status.voting_round().is_none() {
                continue;
            }

            let (mut runtime, session) = self.lock_session(session.id).await?;
            if session.status.voting_round().is_none() || runtime.timer.is_some() {
                continue;
            }

            let left = session.millis_left(now).unwrap_or(0);
            runtime.timer = Some(self.start_timer(&session, Duration::from_millis(left)));
            resumed += 1;
        }

        if resumed > 0 {
            info!("Resumed {} round timer(s)", resumed);
        }
        Ok(resumed)
    }

    /// Timer expiry: advance the round unless the host already did
    pub async fn on_round_timeout(&self, session_id: i64, round: Round) {
        match self.complete_round(session_id, round, Trigger::Timer).await {
            Ok(session) => debug!(
                "Round {} timer advanced session {} to {}",
                round, session_id, session.status
            ),
            Err(VotingError::AlreadyTransitioned { status, .. }) => debug!(
                "Round {} timer of session {} found it already {}",
                round, session_id, status
            ),
            Err(VotingError::SessionNotFound(_)) => {}
            Err(e) => error!(
                "Round {} timer of session {} could not advance it: {}",
                round, session_id, e
            ),
        }
    }

    async fn complete_round(
        &self,
        session_id: i64,
        round: Round,
        trigger: Trigger,
    ) -> VotingResult<Session> {
        let (mut runtime, mut session) = self.lock_session(session_id).await?;
        if let Trigger::Host(user_id) = &trigger {
            require_host(&session, user_id, "complete a round of")?;
        }

        let now = Utc::now();
        match round {
            Round::One => {
                self.inner.rounds.complete_round1(&mut session, now).await?;
                runtime.timer = Some(self.start_timer(&session, session.round_duration()));
            }
            Round::Two => {
                self.inner.rounds.complete_round2(&mut session, now).await?;
                self.retire(session_id, &mut runtime).await;
            }
        }

        info!(
            "Session {} round {} completed ({:?})",
            session_id, round, trigger
        );
        Ok(session)
    }

    async fn expire_locked(
        &self,
        runtime: &mut SessionRuntime,
        session: Session,
        reason: &str,
        now: DateTime<Utc>,
    ) -> VotingResult<Session> {
        let mut next = session;
        next.advance(SessionStatus::Expired)?;
        next.touch(now);
        self.inner.store.save_session(&next).await?;

        self.inner.broadcaster.publish(
            next.id,
            SessionEvent::SessionExpired {
                session_id: next.id,
                reason: reason.to_string(),
                expired_at: now,
            },
        );
        self.retire(next.id, runtime).await;

        info!("Session {} expired: {}", next.id, reason);
        Ok(next)
    }

    fn expiry_reason(&self, session: &Session, now: DateTime<Utc>) -> Option<&'static str> {
        if session.status.is_terminal() {
            return None;
        }
        // A running round always ends through its own timer
        if session.millis_left(now).is_some_and(|left| left > 0) {
            return None;
        }

        let config = &self.inner.config;
        let max_duration = ChronoDuration::minutes(config.max_duration_minutes as i64);
        let inactive = ChronoDuration::minutes(config.inactive_timeout_minutes as i64);

        if now - session.created_at >= max_duration {
            Some(REASON_MAX_DURATION)
        } else if now - session.last_activity_at >= inactive {
            Some(REASON_INACTIVE)
        } else {
            None
        }
    }

    fn start_timer(&self, session: &Session, duration: Duration) -> RoundTimer {
        let engine: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let (session_id, round) = (session.id, session.round);

        RoundTimer::start(
            session_id,
            round,
            duration,
            self.inner.config.timer_tick(),
            self.inner.broadcaster.clone(),
            move || async move {
                if let Some(inner) = engine.upgrade() {
                    SessionEngine { inner }
                        .on_round_timeout(session_id, round)
                        .await;
                }
            },
        )
    }

    /// Release everything a terminal session holds
    async fn retire(&self, session_id: i64, runtime: &mut SessionRuntime) {
        runtime.timer = None;
        self.inner.broadcaster.close(session_id);
        self.inner.runtimes.lock().await.remove(&session_id);
    }

    async fn lock_session(
        &self,
        session_id: i64,
    ) -> VotingResult<(OwnedMutexGuard<SessionRuntime>, Session)> {
        let runtime = {
            let mut runtimes = self.inner.runtimes.lock().await;
            runtimes.entry(session_id).or_default().clone()
        };
        let guard = runtime.lock_owned().await;

        match self.inner.store.find_session(session_id).await? {
            Some(session) => {
                if session.status.is_terminal() {
                    self.inner.runtimes.lock().await.remove(&session_id);
                }
                Ok((guard, session))
            }
            None => {
                self.inner.runtimes.lock().await.remove(&session_id);
                Err(VotingError::SessionNotFound(session_id))
            }
        }
    }

    async fn participant_session(&self, session_id: i64, user_id: &str) -> VotingResult<Session> {
        let session = self
            .inner
            .store
            .find_session(session_id)
            .await?
            .ok_or(VotingError::SessionNotFound(session_id))?;

        if self
            .inner
            .store
            .find_participant(session_id, user_id)
            .await?
            .is_none()
        {
            return Err(VotingError::NotParticipant {
                session_id,
                user_id: user_id.to_string(),
            });
        }

        Ok(session)
    }
}

fn require_host(session: &Session, user_id: &str, action: &'static str) -> VotingResult<()> {
    if !session.is_host(user_id) {
        return Err(VotingError::NotHost {
            session_id: session.id,
            action,
        });
    }
    Ok(())
}
