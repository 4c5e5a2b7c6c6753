//! Live session connection
//!
//! Session events flow out to the client; commands flow in. Replies to a
//! command go to the sender only.

use axum::{
    Extension,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use voting::{SessionEngine, Subscription, VotingError, send_host_command};

use crate::{
    error::{ApiError, ApiResult},
    middleware::AuthUser,
    models::{SocketReply, parse_command},
    state::AppState,
};

const REPLY_BUFFER: usize = 16;

/// Upgrade to a WebSocket once the caller is known to be a participant
pub async fn session_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Response> {
    let subscription = state.engine.subscribe(session_id, &user.id).await?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state.engine, subscription, user.id)))
}

fn error_reply(error: VotingError) -> SocketReply {
    let error = ApiError::from(error);
    SocketReply::Error {
        error: error.public_message(),
        kind: error.kind().to_string(),
    }
}

async fn handle_socket(
    socket: WebSocket,
    engine: SessionEngine,
    mut subscription: Subscription,
    user_id: String,
) {
    let session_id = subscription.session_id;
    let connection_id = subscription.id;
    info!(
        "User {} connected to session {} ({})",
        user_id, session_id, connection_id
    );

    let (mut sender, mut receiver) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<SocketReply>(REPLY_BUFFER);

    let mut send_task = tokio::spawn(async move {
        loop {
            let (payload, last) = tokio::select! {
                event = subscription.recv() => match event {
                    Some(event) => (serde_json::to_string(&event), event.is_final()),
                    None => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(reply) => (serde_json::to_string(&reply), false),
                    None => break,
                },
            };

            let text = match payload {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode message for session {}: {}", session_id, e);
                    continue;
                }
            };

            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
            if last {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };

            let reply = match parse_command(&text) {
                Ok(command) => {
                    match send_host_command(&engine, session_id, &user_id, command).await {
                        Ok(reply) => SocketReply::CommandReply(reply),
                        Err(e) => error_reply(e),
                    }
                }
                Err(e) => error_reply(e),
            };

            if reply_tx.send(reply).await.is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    debug!("Connection {} to session {} closed", connection_id, session_id);
}
