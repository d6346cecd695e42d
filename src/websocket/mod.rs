use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Extension, Path, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::error::ServiceError;
use crate::models::{Envelope, MessageKind, ServerMessage, User};
use crate::services::AppState;
use crate::tasks::DelayedTask;

pub async fn handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    // The room must exist before the upgrade is accepted
    match state.rooms.get_room(&room_id).await {
        Ok(Some(_)) => ws
            .on_upgrade(move |socket| handle_socket(socket, room_id, state))
            .into_response(),
        Ok(None) => {
            tracing::warn!(room_id = %room_id, "Tried to connect to non-existent room");
            StatusCode::NOT_FOUND.into_response()
        }
        Err(e) => {
            tracing::error!(room_id = %room_id, error = %e, "room lookup failed during connect");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn handle_socket(socket: WebSocket, room_id: String, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let conn_id = state.registry.register(&room_id, tx.clone()).await;

    // Pump queued outbound messages (direct replies and room broadcasts)
    // onto the socket
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize outbound message");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = RoomSession::new(room_id.clone(), state.clone(), tx);
    tracing::info!(room_id = %room_id, connection_id = %conn_id, "connection open");

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => session.handle_frame(text.as_str()).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.registry.unregister(&room_id, conn_id).await;
    if let Err(e) = session.disconnect().await {
        tracing::error!(room_id = %room_id, error = %e, "disconnect cleanup failed");
    }
    writer.abort();
    tracing::info!(room_id = %room_id, connection_id = %conn_id, "connection closed");
}

/// Per-connection dispatch state.
///
/// `user` is set by the first frame carrying a valid token and is never
/// cleared until the connection goes away. The room id is fixed at connect
/// time.
pub struct RoomSession {
    room_id: String,
    user: Option<User>,
    state: Arc<AppState>,
    outbound: UnboundedSender<ServerMessage>,
}

impl RoomSession {
    pub fn new(
        room_id: String,
        state: Arc<AppState>,
        outbound: UnboundedSender<ServerMessage>,
    ) -> Self {
        Self {
            room_id,
            user: None,
            state,
            outbound,
        }
    }

    fn send_error(&self, message: &str) {
        let _ = self.outbound.send(ServerMessage::error(message));
    }

    /// One inbound text frame. Every failure is reported to the client;
    /// none of them closes the connection.
    pub async fn handle_frame(&mut self, text: &str) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(error = %e, payload = %text, "Invalid JSON received");
                self.send_error("Invalid JSON");
                return;
            }
        };

        if let Err(e) = self.dispatch(envelope).await {
            tracing::error!(room_id = %self.room_id, error = %e, "Error processing message");
            self.send_error("An unexpected error occurred");
        }
    }

    async fn dispatch(&mut self, envelope: Envelope) -> Result<(), ServiceError> {
        if let Some(token) = envelope.token.as_deref() {
            match self.state.users.get_user_from_token(token).await? {
                Some(user) => self.user = Some(user),
                None => {
                    self.send_error("Invalid token.");
                    return Ok(());
                }
            }
        }

        match envelope.kind {
            MessageKind::JoinRoom => {
                // The room can be deactivated between connect and join
                if self.state.rooms.get_room(&self.room_id).await?.is_some() {
                    self.state
                        .commands
                        .handle_join_room(&self.room_id, self.user.as_ref())
                        .await?;
                } else {
                    self.send_error("Room does not exist.");
                }
            }
            MessageKind::LeaveRoom => {
                self.state
                    .commands
                    .handle_leave_room(&self.room_id, self.user.as_ref())
                    .await?;
            }
            MessageKind::EditRoom => {
                self.state
                    .commands
                    .handle_edit_room(&self.room_id, self.user.as_ref(), envelope.data)
                    .await?;
            }
            MessageKind::Unknown => self.send_error("Unknown message type"),
        }
        Ok(())
    }

    /// Teardown: leave the room and, when the last participant is gone,
    /// queue the delayed deactivation. Fire-and-forget; task execution is
    /// never awaited here.
    pub async fn disconnect(self) -> Result<(), ServiceError> {
        let Some(user) = self.user.as_ref() else {
            return Ok(());
        };

        self.state
            .commands
            .handle_leave_room(&self.room_id, Some(user))
            .await?;

        let Some(room) = self.state.rooms.get_room(&self.room_id).await? else {
            return Ok(());
        };
        let participant_count = self.state.rooms.count_participants(&room).await?;
        tracing::info!(
            room_id = %self.room_id,
            participant_count,
            "remaining participants after disconnect"
        );

        if participant_count == 0 {
            tracing::info!(room_id = %self.room_id, "room is empty, starting the deactivation task");
            let delay = Duration::from_secs(self.state.config.deactivation_delay_seconds);
            self.state
                .scheduler
                .schedule_delayed(
                    DelayedTask::DeactivateRoomIfEmpty {
                        room_id: self.room_id.clone(),
                    },
                    delay,
                )
                .await?;
            tracing::info!(
                room_id = %self.room_id,
                delay_seconds = delay.as_secs(),
                "deactivation task added to the queue"
            );
        }
        Ok(())
    }
}
