//! Session, participant, candidate and vote models

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::{VotingError, VotingResult};

/// Likes a participant may cast in the final round, whatever the session allows in round one.
pub const ROUND_TWO_LIKE_CAP: u32 = 1;

/// Raised when a round number outside `{1, 2}` is decoded.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("round must be 1 or 2, got {0}")]
pub struct RoundOutOfRange(pub i64);

/// One of the two voting phases of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Round {
    One,
    Two,
}

impl Round {
    pub fn number(self) -> u8 {
        match self {
            Round::One => 1,
            Round::Two => 2,
        }
    }
}

impl TryFrom<u8> for Round {
    type Error = RoundOutOfRange;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Round::try_from(i64::from(value))
    }
}

impl TryFrom<i64> for Round {
    type Error = RoundOutOfRange;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Round::One),
            2 => Ok(Round::Two),
            other => Err(RoundOutOfRange(other)),
        }
    }
}

impl From<Round> for u8 {
    fn from(round: Round) -> Self {
        round.number()
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Lifecycle status of a session
///
/// Statuses only move forward: `OPEN → ROUND1 → ROUND2 → COMPLETE`, with
/// `EXPIRED` reachable from every status except `COMPLETE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Open,
    Round1,
    Round2,
    Complete,
    Expired,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Open => "OPEN",
            SessionStatus::Round1 => "ROUND1",
            SessionStatus::Round2 => "ROUND2",
            SessionStatus::Complete => "COMPLETE",
            SessionStatus::Expired => "EXPIRED",
        }
    }

    /// Whether the session is immutable
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Complete | SessionStatus::Expired)
    }

    /// The round currently accepting votes, if any
    pub fn voting_round(self) -> Option<Round> {
        match self {
            SessionStatus::Round1 => Some(Round::One),
            SessionStatus::Round2 => Some(Round::Two),
            _ => None,
        }
    }

    /// Whether `next` is a legal successor of this status
    pub fn can_advance_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;

        matches!(
            (self, next),
            (Open, Round1)
                | (Round1, Round2)
                | (Round2, Complete)
                | (Open, Expired)
                | (Round1, Expired)
                | (Round2, Expired)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OPEN" => Ok(SessionStatus::Open),
            "ROUND1" => Ok(SessionStatus::Round1),
            "ROUND2" => Ok(SessionStatus::Round2),
            "COMPLETE" | "COMPLETED" => Ok(SessionStatus::Complete),
            "EXPIRED" => Ok(SessionStatus::Expired),
            other => Err(format!("unknown session status: {}", other)),
        }
    }
}

/// Session entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: i64,
    pub join_code: String,
    pub host_id: String,
    pub pool_size: u32,
    pub round_minutes: u32,
    pub likes_per_user: u32,
    pub round: Round,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub round_started_at: Option<DateTime<Utc>>,
    pub round_ends_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_host(&self, user_id: &str) -> bool {
        self.host_id == user_id
    }

    /// Maximum `LIKE` votes per participant in `round`
    pub fn like_cap(&self, round: Round) -> u32 {
        match round {
            Round::One => self.likes_per_user,
            Round::Two => ROUND_TWO_LIKE_CAP,
        }
    }

    pub fn round_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.round_minutes) * 60)
    }

    /// Move to `next`, refusing backward or repeated transitions.
    pub fn advance(&mut self, next: SessionStatus) -> VotingResult<()> {
        if !self.status.can_advance_to(next) {
            return Err(VotingError::AlreadyTransitioned {
                session_id: self.id,
                status: self.status,
            });
        }

        self.status = next;
        Ok(())
    }

    /// Record the start of a timed round
    pub fn begin_round(&mut self, round: Round, now: DateTime<Utc>) {
        self.round = round;
        self.round_started_at = Some(now);
        self.round_ends_at = Some(now + Duration::minutes(i64::from(self.round_minutes)));
    }

    /// Milliseconds left in the running round
    pub fn millis_left(&self, now: DateTime<Utc>) -> Option<u64> {
        if self.status.voting_round().is_none() {
            return None;
        }

        self.round_ends_at
            .map(|ends_at| (ends_at - now).num_milliseconds().max(0) as u64)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }
}

/// New session creation payload
#[derive(Debug, Clone)]
pub struct NewSession {
    pub join_code: String,
    pub host_id: String,
    pub pool_size: u32,
    pub round_minutes: u32,
    pub likes_per_user: u32,
    pub created_at: DateTime<Utc>,
}

/// Membership of a user in a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub session_id: i64,
    pub user_id: String,
    pub is_host: bool,
    pub joined_at: DateTime<Utc>,
}

/// Restaurant data supplied by the places lookup service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestaurantDetails {
    pub provider_id: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub price_level: Option<String>,
    #[serde(default)]
    pub price_range: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub user_rating_count: Option<u32>,
    #[serde(default)]
    pub opening_hours: Vec<String>,
    #[serde(default)]
    pub generative_summary: Option<String>,
    #[serde(default)]
    pub review_summary: Option<String>,
    #[serde(default)]
    pub website_uri: Option<String>,
    #[serde(default)]
    pub photo_references: Vec<String>,
}

impl RestaurantDetails {
    /// Minimal details, mostly useful for seeding pools in tests
    pub fn named(provider_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            name: name.into(),
            category: None,
            address: None,
            price_level: None,
            price_range: None,
            rating: None,
            user_rating_count: None,
            opening_hours: Vec::new(),
            generative_summary: None,
            review_summary: None,
            website_uri: None,
            photo_references: Vec::new(),
        }
    }
}

/// A restaurant presented to a session in a given round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRestaurant {
    pub session_id: i64,
    pub round: Round,
    /// Index in the original round-one pool, used for tie-breaking
    pub position: u32,
    #[serde(flatten)]
    pub details: RestaurantDetails,
    pub like_count: u32,
}

impl CandidateRestaurant {
    pub fn provider_id(&self) -> &str {
        &self.details.provider_id
    }

    /// Copy into `round` with a fresh counter
    pub fn carry_forward(&self, round: Round) -> Self {
        Self {
            session_id: self.session_id,
            round,
            position: self.position,
            details: self.details.clone(),
            like_count: 0,
        }
    }
}

/// Like or dislike
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteType {
    #[serde(alias = "like")]
    Like,
    #[serde(alias = "dislike")]
    Dislike,
}

impl VoteType {
    pub fn as_str(self) -> &'static str {
        match self {
            VoteType::Like => "LIKE",
            VoteType::Dislike => "DISLIKE",
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LIKE" => Ok(VoteType::Like),
            "DISLIKE" => Ok(VoteType::Dislike),
            other => Err(format!("unknown vote type: {}", other)),
        }
    }
}

/// A recorded vote; never mutated once stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub session_id: i64,
    pub user_id: String,
    pub provider_id: String,
    pub round: Round,
    pub vote_type: VoteType,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(status: SessionStatus) -> Session {
        let now = Utc::now();
        Session {
            id: 7,
            join_code: "ABC234".to_string(),
            host_id: "host".to_string(),
            pool_size: 5,
            round_minutes: 2,
            likes_per_user: 3,
            round: Round::One,
            status,
            created_at: now,
            last_activity_at: now,
            round_started_at: None,
            round_ends_at: None,
        }
    }

    #[test]
    fn test_status_only_moves_forward() {
        use SessionStatus::*;

        assert!(Open.can_advance_to(Round1));
        assert!(Round1.can_advance_to(Round2));
        assert!(Round2.can_advance_to(Complete));
        assert!(Round1.can_advance_to(Expired));

        assert!(!Round2.can_advance_to(Round1));
        assert!(!Complete.can_advance_to(Round2));
        assert!(!Complete.can_advance_to(Expired));
        assert!(!Expired.can_advance_to(Open));
        assert!(!Round1.can_advance_to(Round1));
        assert!(!Open.can_advance_to(Round2));
    }

    #[test]
    fn test_advance_rejects_repeat() {
        let mut session = session(SessionStatus::Round1);
        session.advance(SessionStatus::Round2).unwrap();

        let err = session.advance(SessionStatus::Round2).unwrap_err();
        assert!(matches!(
            err,
            VotingError::AlreadyTransitioned {
                status: SessionStatus::Round2,
                ..
            }
        ));
        assert_eq!(session.status, SessionStatus::Round2);
    }

    #[test]
    fn test_like_cap_per_round() {
        let session = session(SessionStatus::Round1);
        assert_eq!(session.like_cap(Round::One), 3);
        assert_eq!(session.like_cap(Round::Two), 1);
    }

    #[test]
    fn test_millis_left_only_while_voting() {
        let mut session = session(SessionStatus::Open);
        let now = Utc::now();
        session.begin_round(Round::One, now);
        assert_eq!(session.millis_left(now), None);

        session.status = SessionStatus::Round1;
        assert_eq!(session.millis_left(now), Some(120_000));
        assert_eq!(session.millis_left(now + Duration::minutes(5)), Some(0));
    }

    #[test]
    fn test_wire_formats() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Round2).unwrap(),
            "\"ROUND2\""
        );
        assert_eq!(serde_json::to_string(&Round::Two).unwrap(), "2");
        assert_eq!(
            serde_json::from_str::<VoteType>("\"like\"").unwrap(),
            VoteType::Like
        );
        assert!(serde_json::from_str::<Round>("3").is_err());
        assert_eq!(
            "completed".parse::<SessionStatus>().unwrap(),
            SessionStatus::Complete
        );
    }
}
