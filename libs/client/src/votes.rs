//! Optimistic vote tracking
//!
//! A vote shows up as soon as the user casts it (`Pending`) and is then
//! either confirmed or rolled back once the server answers. The server stays
//! the authority on caps; the local cap check only avoids requests that are
//! bound to fail.

use voting::{Round, VoteType};

use crate::error::{ClientError, ClientResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteState {
    Pending,
    Confirmed,
    RolledBack { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedVote {
    pub provider_id: String,
    pub vote_type: VoteType,
    pub round: Round,
    pub state: VoteState,
}

impl TrackedVote {
    fn holds_like(&self) -> bool {
        self.vote_type == VoteType::Like && !matches!(self.state, VoteState::RolledBack { .. })
    }
}

#[derive(Debug, Clone)]
pub struct VoteTracker {
    round: Round,
    like_cap: u32,
    votes: Vec<TrackedVote>,
}

impl VoteTracker {
    pub fn new(round: Round, like_cap: u32) -> Self {
        Self {
            round,
            like_cap,
            votes: Vec::new(),
        }
    }

    pub fn round(&self) -> Round {
        self.round
    }

    /// Forget all votes when a new round begins
    pub fn reset_round(&mut self, round: Round, like_cap: u32) {
        self.round = round;
        self.like_cap = like_cap;
        self.votes.clear();
    }

    /// Record a vote optimistically, before the server has answered
    pub fn begin(&mut self, provider_id: &str, vote_type: VoteType) -> ClientResult<()> {
        if let Some(existing) = self.get(provider_id) {
            if !matches!(existing.state, VoteState::RolledBack { .. }) {
                return Err(ClientError::AlreadyVoted(provider_id.to_string()));
            }
        }
        if vote_type == VoteType::Like && self.remaining_likes() == 0 {
            return Err(ClientError::NoLikesLeft);
        }

        self.votes.retain(|v| v.provider_id != provider_id);
        self.votes.push(TrackedVote {
            provider_id: provider_id.to_string(),
            vote_type,
            round: self.round,
            state: VoteState::Pending,
        });
        Ok(())
    }

    pub fn confirm(&mut self, provider_id: &str) -> ClientResult<()> {
        let vote = self.pending_mut(provider_id)?;
        vote.state = VoteState::Confirmed;
        Ok(())
    }

    /// Undo a pending vote the server refused
    pub fn rollback(&mut self, provider_id: &str, reason: impl Into<String>) -> ClientResult<()> {
        let vote = self.pending_mut(provider_id)?;
        vote.state = VoteState::RolledBack {
            reason: reason.into(),
        };
        Ok(())
    }

    /// Confirm or roll back according to the server's answer
    pub fn settle<T, E: std::fmt::Display>(
        &mut self,
        provider_id: &str,
        outcome: &Result<T, E>,
    ) -> ClientResult<()> {
        match outcome {
            Ok(_) => self.confirm(provider_id),
            Err(e) => self.rollback(provider_id, e.to_string()),
        }
    }

    pub fn get(&self, provider_id: &str) -> Option<&TrackedVote> {
        self.votes.iter().find(|v| v.provider_id == provider_id)
    }

    pub fn votes(&self) -> &[TrackedVote] {
        &self.votes
    }

    pub fn pending(&self) -> usize {
        self.votes
            .iter()
            .filter(|v| v.state == VoteState::Pending)
            .count()
    }

    /// Likes left, counting pending likes as spent
    pub fn remaining_likes(&self) -> u32 {
        let used = self.votes.iter().filter(|v| v.holds_like()).count() as u32;
        self.like_cap.saturating_sub(used)
    }

    fn pending_mut(&mut self, provider_id: &str) -> ClientResult<&mut TrackedVote> {
        self.votes
            .iter_mut()
            .find(|v| v.provider_id == provider_id && v.state == VoteState::Pending)
            .ok_or_else(|| ClientError::UnknownVote(provider_id.to_string()))
    }
}
