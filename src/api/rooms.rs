use axum::{
    extract::{Extension, Json as JsonExtractor, Path},
    http::StatusCode,
    response::Json,
};
use std::sync::Arc;

use crate::models::{CreateRoomRequest, Room, RoomDetailsResponse};
use crate::services::AppState;

pub async fn create_room(
    Extension(state): Extension<Arc<AppState>>,
    JsonExtractor(payload): JsonExtractor<CreateRoomRequest>,
) -> Result<Json<Room>, (StatusCode, String)> {
    tracing::info!(name = %payload.name, creator_id = %payload.creator_id, "api::rooms::create_room called");
    let room = state
        .rooms
        .create_room(&payload.name, payload.topic.as_deref(), &payload.creator_id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "create_room service error");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    Ok(Json(room))
}

pub async fn get_room(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RoomDetailsResponse>, (StatusCode, String)> {
    tracing::info!(room_id = %id, "api::rooms::get_room called");
    let room = state.rooms.get_room(&id).await.map_err(|e| {
        tracing::error!(error = %e, "get_room service error");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    match room {
        Some(room) => {
            let participant_count = state.rooms.count_participants(&room).await.map_err(|e| {
                tracing::error!(error = %e, "count_participants service error");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            })?;
            Ok(Json(RoomDetailsResponse {
                room,
                participant_count,
            }))
        }
        None => Err((StatusCode::NOT_FOUND, "Room not found".to_string())),
    }
}
