//! Host command channel
//!
//! Commands arrive over a participant's live connection (or the HTTP
//! fallback) and are routed into the [`SessionEngine`], which checks host
//! identity itself.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::engine::SessionEngine;
use crate::error::{VotingError, VotingResult};
use crate::events::SessionEvent;
use crate::models::SessionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HostCommand {
    Start,
    CompleteRound1,
    CompleteRound2,
    End,
    /// Not host-only: any participant may ask for its own round status
    GetRoundStatus,
}

impl HostCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            HostCommand::Start => "start",
            HostCommand::CompleteRound1 => "completeRound1",
            HostCommand::CompleteRound2 => "completeRound2",
            HostCommand::End => "end",
            HostCommand::GetRoundStatus => "getRoundStatus",
        }
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostCommand {
    type Err = VotingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(HostCommand::Start),
            "completeRound1" | "complete-round-1" => Ok(HostCommand::CompleteRound1),
            "completeRound2" | "complete-round-2" => Ok(HostCommand::CompleteRound2),
            "end" => Ok(HostCommand::End),
            "getRoundStatus" => Ok(HostCommand::GetRoundStatus),
            other => Err(VotingError::UnknownCommand(other.to_string())),
        }
    }
}

/// Outcome of a command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum CommandReply {
    /// The command changed the session's status
    Applied { status: SessionStatus },
    /// The transition had already happened; nothing was re-broadcast
    Ignored { reason: String },
    /// Reply meant for the sender only
    Direct { event: SessionEvent },
}

/// Route a command from `user_id` into the session state machine.
///
/// Repeating a transition that already happened is answered with
/// [`CommandReply::Ignored`] rather than an error.
pub async fn send_host_command(
    engine: &SessionEngine,
    session_id: i64,
    user_id: &str,
    command: HostCommand,
) -> VotingResult<CommandReply> {
    let result = match command {
        HostCommand::Start => engine.start_session(session_id, user_id).await,
        HostCommand::CompleteRound1 => engine.complete_round1(session_id, user_id).await,
        HostCommand::CompleteRound2 => engine.complete_round2(session_id, user_id).await,
        HostCommand::End => engine.end_session(session_id, user_id).await,
        HostCommand::GetRoundStatus => {
            let event = engine.round_status(session_id, user_id).await?;
            return Ok(CommandReply::Direct { event });
        }
    };

    match result {
        Ok(session) => {
            info!(
                "Command {} from {} applied to session {}",
                command, user_id, session_id
            );
            Ok(CommandReply::Applied {
                status: session.status,
            })
        }
        Err(e @ VotingError::AlreadyTransitioned { .. }) => Ok(CommandReply::Ignored {
            reason: e.to_string(),
        }),
        Err(e) => {
            warn!(
                "Command {} from {} rejected for session {}: {}",
                command, user_id, session_id, e
            );
            Err(e)
        }
    }
}
