//! PostgreSQL session store
//!
//! Vote uniqueness is enforced by the `session_votes` primary key and the
//! like cap by locking the participant row for the duration of the vote
//! transaction, so concurrent submissions cannot both succeed.

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use std::collections::HashMap;
use tracing::debug;

use common::error::DatabaseError;

use super::{SessionStore, StoreError, StoreResult};
use crate::models::{
    CandidateRestaurant, NewSession, Participant, RestaurantDetails, Round, Session, Vote,
    VoteType,
};

const SESSION_COLUMNS: &str = "id, join_code, host_id, pool_size, round_minutes, likes_per_user, \
     round, status, created_at, last_activity_at, round_started_at, round_ends_at";

const CANDIDATE_COLUMNS: &str = "session_id, provider_id, round, position, name, category, \
     address, price_level, price_range, rating, user_rating_count, opening_hours, \
     generative_summary, review_summary, website_uri, photo_references, like_count";

fn query_error(e: sqlx::Error) -> StoreError {
    let err = DatabaseError::Query(e);
    if err.is_unique_violation() {
        StoreError::Duplicate
    } else {
        StoreError::Database(err)
    }
}

fn decode_round(value: i16) -> StoreResult<Round> {
    Round::try_from(i64::from(value)).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn session_from_row(row: &PgRow) -> StoreResult<Session> {
    let status: String = row.get("status");

    Ok(Session {
        id: row.get("id"),
        join_code: row.get("join_code"),
        host_id: row.get("host_id"),
        pool_size: row.get::<i32, _>("pool_size") as u32,
        round_minutes: row.get::<i32, _>("round_minutes") as u32,
        likes_per_user: row.get::<i32, _>("likes_per_user") as u32,
        round: decode_round(row.get("round"))?,
        status: status.parse().map_err(StoreError::Corrupt)?,
        created_at: row.get("created_at"),
        last_activity_at: row.get("last_activity_at"),
        round_started_at: row.get("round_started_at"),
        round_ends_at: row.get("round_ends_at"),
    })
}

fn participant_from_row(row: &PgRow) -> Participant {
    Participant {
        session_id: row.get("session_id"),
        user_id: row.get("user_id"),
        is_host: row.get("is_host"),
        joined_at: row.get("joined_at"),
    }
}

fn candidate_from_row(row: &PgRow) -> StoreResult<CandidateRestaurant> {
    let opening_hours: serde_json::Value = row.get("opening_hours");
    let photo_references: serde_json::Value = row.get("photo_references");

    Ok(CandidateRestaurant {
        session_id: row.get("session_id"),
        round: decode_round(row.get("round"))?,
        position: row.get::<i32, _>("position") as u32,
        details: RestaurantDetails {
            provider_id: row.get("provider_id"),
            name: row.get("name"),
            category: row.get("category"),
            address: row.get("address"),
            price_level: row.get("price_level"),
            price_range: row.get("price_range"),
            rating: row.get("rating"),
            user_rating_count: row
                .get::<Option<i32>, _>("user_rating_count")
                .map(|count| count as u32),
            opening_hours: serde_json::from_value(opening_hours)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            generative_summary: row.get("generative_summary"),
            review_summary: row.get("review_summary"),
            website_uri: row.get("website_uri"),
            photo_references: serde_json::from_value(photo_references)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        },
        like_count: row.get::<i32, _>("like_count") as u32,
    })
}

/// Session store backed by PostgreSQL
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    /// Create a new store over an initialised pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create_session(&self, new_session: NewSession) -> StoreResult<Session> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO sessions (join_code, host_id, pool_size, round_minutes, likes_per_user,
                                  created_at, last_activity_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(&new_session.join_code)
        .bind(&new_session.host_id)
        .bind(new_session.pool_size as i32)
        .bind(new_session.round_minutes as i32)
        .bind(new_session.likes_per_user as i32)
        .bind(new_session.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match query_error(e) {
            StoreError::Duplicate => StoreError::JoinCodeTaken(new_session.join_code.clone()),
            other => other,
        })?;

        session_from_row(&row)
    }

    async fn find_session(&self, session_id: i64) -> StoreResult<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn find_by_join_code(&self, join_code: &str) -> StoreResult<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE join_code = $1 AND status <> 'EXPIRED'"
        ))
        .bind(join_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn save_session(&self, session: &Session) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET round = $2, status = $3, last_activity_at = $4,
                round_started_at = $5, round_ends_at = $6
            WHERE id = $1
            "#,
        )
        .bind(session.id)
        .bind(i16::from(session.round.number()))
        .bind(session.status.as_str())
        .bind(session.last_activity_at)
        .bind(session.round_started_at)
        .bind(session.round_ends_at)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("session {}", session.id)));
        }

        Ok(())
    }

    async fn list_live_sessions(&self) -> StoreResult<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE status NOT IN ('COMPLETE', 'EXPIRED') ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.iter().map(session_from_row).collect()
    }

    async fn add_participant(&self, participant: &Participant) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO session_participants (session_id, user_id, is_host, joined_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(participant.session_id)
        .bind(&participant.user_id)
        .bind(participant.is_host)
        .bind(participant.joined_at)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn find_participant(
        &self,
        session_id: i64,
        user_id: &str,
    ) -> StoreResult<Option<Participant>> {
        let row = sqlx::query(
            r#"
            SELECT session_id, user_id, is_host, joined_at
            FROM session_participants
            WHERE session_id = $1 AND user_id = $2
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(row.as_ref().map(participant_from_row))
    }

    async fn list_participants(&self, session_id: i64) -> StoreResult<Vec<Participant>> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, user_id, is_host, joined_at
            FROM session_participants
            WHERE session_id = $1
            ORDER BY joined_at, user_id
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(rows.iter().map(participant_from_row).collect())
    }

    async fn insert_candidates(&self, candidates: &[CandidateRestaurant]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;

        for candidate in candidates {
            let details = &candidate.details;
            sqlx::query(
                r#"
                INSERT INTO session_restaurants (
                    session_id, provider_id, round, position, name, category, address,
                    price_level, price_range, rating, user_rating_count, opening_hours,
                    generative_summary, review_summary, website_uri, photo_references, like_count
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                ON CONFLICT (session_id, provider_id, round) DO NOTHING
                "#,
            )
            .bind(candidate.session_id)
            .bind(&details.provider_id)
            .bind(i16::from(candidate.round.number()))
            .bind(candidate.position as i32)
            .bind(&details.name)
            .bind(&details.category)
            .bind(&details.address)
            .bind(&details.price_level)
            .bind(&details.price_range)
            .bind(details.rating)
            .bind(details.user_rating_count.map(|count| count as i32))
            .bind(serde_json::json!(details.opening_hours))
            .bind(&details.generative_summary)
            .bind(&details.review_summary)
            .bind(&details.website_uri)
            .bind(serde_json::json!(details.photo_references))
            .bind(candidate.like_count as i32)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        }

        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn list_candidates(
        &self,
        session_id: i64,
        round: Round,
    ) -> StoreResult<Vec<CandidateRestaurant>> {
        let rows = sqlx::query(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM session_restaurants \
             WHERE session_id = $1 AND round = $2 ORDER BY position"
        ))
        .bind(session_id)
        .bind(i16::from(round.number()))
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.iter().map(candidate_from_row).collect()
    }

    async fn record_vote(&self, vote: &Vote, like_cap: u32) -> StoreResult<()> {
        let round = i16::from(vote.round.number());
        let mut tx = self.pool.begin().await.map_err(query_error)?;

        // Serialises this user's votes within the session
        let member = sqlx::query(
            "SELECT 1 FROM session_participants WHERE session_id = $1 AND user_id = $2 FOR UPDATE",
        )
        .bind(vote.session_id)
        .bind(&vote.user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_error)?;
        if member.is_none() {
            return Err(StoreError::NotFound(format!("participant {}", vote.user_id)));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO session_votes (session_id, user_id, provider_id, round, vote_type, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (session_id, user_id, provider_id, round) DO NOTHING
            "#,
        )
        .bind(vote.session_id)
        .bind(&vote.user_id)
        .bind(&vote.provider_id)
        .bind(round)
        .bind(vote.vote_type.as_str())
        .bind(vote.created_at)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::Duplicate);
        }

        if vote.vote_type == VoteType::Like {
            let likes: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM session_votes
                WHERE session_id = $1 AND user_id = $2 AND round = $3 AND vote_type = 'LIKE'
                "#,
            )
            .bind(vote.session_id)
            .bind(&vote.user_id)
            .bind(round)
            .fetch_one(&mut *tx)
            .await
            .map_err(query_error)?;

            // the count includes the row just inserted; dropping tx rolls it back
            if likes > i64::from(like_cap) {
                return Err(StoreError::CapExceeded { cap: like_cap });
            }

            let updated = sqlx::query(
                r#"
                UPDATE session_restaurants
                SET like_count = like_count + 1
                WHERE session_id = $1 AND provider_id = $2 AND round = $3
                "#,
            )
            .bind(vote.session_id)
            .bind(&vote.provider_id)
            .bind(round)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;

            if updated.rows_affected() == 0 {
                return Err(StoreError::NotFound(format!("restaurant {}", vote.provider_id)));
            }
        }

        tx.commit().await.map_err(query_error)?;
        debug!(
            "Stored {} vote for session {} round {}",
            vote.vote_type, vote.session_id, vote.round
        );

        Ok(())
    }

    async fn count_likes(&self, session_id: i64, user_id: &str, round: Round) -> StoreResult<u32> {
        let likes: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM session_votes
            WHERE session_id = $1 AND user_id = $2 AND round = $3 AND vote_type = 'LIKE'
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .bind(i16::from(round.number()))
        .fetch_one(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(likes as u32)
    }

    async fn likes_by_user(
        &self,
        session_id: i64,
        round: Round,
    ) -> StoreResult<HashMap<String, u32>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, COUNT(*) AS likes
            FROM session_votes
            WHERE session_id = $1 AND round = $2 AND vote_type = 'LIKE'
            GROUP BY user_id
            "#,
        )
        .bind(session_id)
        .bind(i16::from(round.number()))
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("user_id"), row.get::<i64, _>("likes") as u32))
            .collect())
    }

    async fn count_session_likes(&self, session_id: i64) -> StoreResult<u64> {
        let likes: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM session_votes WHERE session_id = $1 AND vote_type = 'LIKE'",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(likes as u64)
    }

    async fn health_check(&self) -> StoreResult<bool> {
        Ok(common::database::health_check(&self.pool).await?)
    }
}
