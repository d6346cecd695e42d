use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{MySql, Pool};

use crate::config::Config;
use crate::database;
use crate::error::ServiceError;
use crate::models::{Room, User};
use crate::registry::ConnectionRegistry;
use crate::tasks::TaskScheduler;

pub mod commands;

pub use commands::{DbRoomCommands, RoomCommands};

/// Shared application state handed to every handler.
pub struct AppState {
    pub config: Config,
    pub rooms: Arc<dyn RoomService>,
    pub users: Arc<dyn UserService>,
    pub commands: Arc<dyn RoomCommands>,
    pub scheduler: Arc<dyn TaskScheduler>,
    pub registry: Arc<ConnectionRegistry>,
}

/// Room lookups and lifecycle. The dispatcher depends on this contract
/// only, never on the database directly.
#[async_trait]
pub trait RoomService: Send + Sync {
    async fn get_room(&self, room_id: &str) -> Result<Option<Room>, ServiceError>;

    async fn count_participants(&self, room: &Room) -> Result<i64, ServiceError>;

    async fn create_room(
        &self,
        name: &str,
        topic: Option<&str>,
        creator_id: &str,
    ) -> Result<Room, ServiceError>;
}

/// Token to user resolution.
#[async_trait]
pub trait UserService: Send + Sync {
    async fn get_user_from_token(&self, token: &str) -> Result<Option<User>, ServiceError>;
}

pub struct DbRoomService {
    pool: Pool<MySql>,
}

impl DbRoomService {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoomService for DbRoomService {
    async fn get_room(&self, room_id: &str) -> Result<Option<Room>, ServiceError> {
        Ok(database::get_room(&self.pool, room_id).await?)
    }

    async fn count_participants(&self, room: &Room) -> Result<i64, ServiceError> {
        Ok(database::count_participants(&self.pool, &room.id).await?)
    }

    async fn create_room(
        &self,
        name: &str,
        topic: Option<&str>,
        creator_id: &str,
    ) -> Result<Room, ServiceError> {
        let room = database::create_room(&self.pool, name, topic, creator_id).await?;
        tracing::info!(room_id = %room.id, creator_id = %creator_id, "room created");
        Ok(room)
    }
}

pub struct DbUserService {
    pool: Pool<MySql>,
}

impl DbUserService {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserService for DbUserService {
    async fn get_user_from_token(&self, token: &str) -> Result<Option<User>, ServiceError> {
        let user = database::get_user_by_token(&self.pool, token).await?;
        match &user {
            Some(user) => tracing::debug!(user_id = %user.id, "token resolved"),
            None => tracing::debug!("token did not resolve to a user"),
        }
        Ok(user)
    }
}
