//! Request and response bodies

use serde::{Deserialize, Serialize};
use voting::{CommandReply, HostCommand, Round, VoteType, VotingError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastVoteRequest {
    pub vote_type: VoteType,
    pub round: Round,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemainingVotesResponse {
    pub session_id: i64,
    pub round: Round,
    pub remaining_votes: u32,
}

/// Command sent by a client over the WebSocket
#[derive(Debug, Deserialize)]
pub struct SocketCommand {
    pub command: HostCommand,
}

/// Non-event messages sent to a WebSocket client
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum SocketReply {
    CommandReply(CommandReply),
    Error { error: String, kind: String },
}

/// Accepts `{"command": "start"}` or the bare command name
pub fn parse_command(text: &str) -> Result<HostCommand, VotingError> {
    let text = text.trim();
    if text.starts_with('{') {
        return serde_json::from_str::<SocketCommand>(text)
            .map(|c| c.command)
            .map_err(|_| VotingError::UnknownCommand(text.to_string()));
    }
    text.parse()
}
