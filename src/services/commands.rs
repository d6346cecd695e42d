use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{MySql, Pool};

use crate::database;
use crate::error::ServiceError;
use crate::models::{EditRoomData, ServerMessage, User};
use crate::registry::ConnectionRegistry;

/// The three room operations a connected client can issue. `user` is `None`
/// until the connection has authenticated; each command decides how to
/// degrade in that case instead of failing the frame.
#[async_trait]
pub trait RoomCommands: Send + Sync {
    async fn handle_join_room(&self, room_id: &str, user: Option<&User>)
        -> Result<(), ServiceError>;

    async fn handle_leave_room(
        &self,
        room_id: &str,
        user: Option<&User>,
    ) -> Result<(), ServiceError>;

    async fn handle_edit_room(
        &self,
        room_id: &str,
        user: Option<&User>,
        data: serde_json::Value,
    ) -> Result<(), ServiceError>;
}

pub struct DbRoomCommands {
    pool: Pool<MySql>,
    registry: Arc<ConnectionRegistry>,
}

impl DbRoomCommands {
    pub fn new(pool: Pool<MySql>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { pool, registry }
    }
}

#[async_trait]
impl RoomCommands for DbRoomCommands {
    async fn handle_join_room(
        &self,
        room_id: &str,
        user: Option<&User>,
    ) -> Result<(), ServiceError> {
        let Some(user) = user else {
            tracing::warn!(room_id = %room_id, "joinRoom without an authenticated user ignored");
            return Ok(());
        };

        let joined = database::add_participant(&self.pool, room_id, &user.id).await?;
        if joined {
            tracing::info!(room_id = %room_id, user_id = %user.id, "user joined room");
            self.registry
                .broadcast(room_id, ServerMessage::UserJoined { user: user.clone() })
                .await;
        } else {
            tracing::debug!(room_id = %room_id, user_id = %user.id, "user already in room");
        }
        Ok(())
    }

    async fn handle_leave_room(
        &self,
        room_id: &str,
        user: Option<&User>,
    ) -> Result<(), ServiceError> {
        // Leaving before authenticating is a no-op, not an error
        let Some(user) = user else {
            tracing::debug!(room_id = %room_id, "leaveRoom without an authenticated user ignored");
            return Ok(());
        };

        let left = database::remove_participant(&self.pool, room_id, &user.id).await?;
        if left {
            tracing::info!(room_id = %room_id, user_id = %user.id, "user left room");
            self.registry
                .broadcast(room_id, ServerMessage::UserLeft { user: user.clone() })
                .await;
        } else {
            tracing::debug!(room_id = %room_id, user_id = %user.id, "user was not in room");
        }
        Ok(())
    }

    async fn handle_edit_room(
        &self,
        room_id: &str,
        user: Option<&User>,
        data: serde_json::Value,
    ) -> Result<(), ServiceError> {
        let Some(user) = user else {
            tracing::warn!(room_id = %room_id, "editRoom without an authenticated user ignored");
            return Ok(());
        };

        let edit: EditRoomData = if data.is_null() {
            EditRoomData::default()
        } else {
            serde_json::from_value(data)?
        };

        database::update_room(&self.pool, room_id, edit.name.as_deref(), edit.topic.as_deref())
            .await?;
        tracing::info!(room_id = %room_id, user_id = %user.id, "room edited");

        if let Some(room) = database::get_room(&self.pool, room_id).await? {
            self.registry
                .broadcast(room_id, ServerMessage::RoomUpdated { room })
                .await;
        }
        Ok(())
    }
}
