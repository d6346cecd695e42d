use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub topic: Option<String>,
    #[serde(rename = "creatorId")]
    pub creator_id: String,
    #[serde(rename = "isActive")]
    pub is_active: bool,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

/// Inbound message kinds. Anything the client sends outside the three known
/// values collapses into `Unknown`, which the dispatcher answers with a
/// protocol error rather than a parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "joinRoom")]
    JoinRoom,
    #[serde(rename = "leaveRoom")]
    LeaveRoom,
    #[serde(rename = "editRoom")]
    EditRoom,
    #[serde(other)]
    Unknown,
}

impl Default for MessageKind {
    fn default() -> Self {
        MessageKind::Unknown
    }
}

/// One inbound frame: `{type, data?, token?}`. A missing `type` behaves the
/// same as an unrecognized one.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default = "empty_object")]
    pub data: serde_json::Value,
    pub token: Option<String>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Fields a client may change through `editRoom`.
#[derive(Debug, Default, Deserialize)]
pub struct EditRoomData {
    pub name: Option<String>,
    pub topic: Option<String>,
}

/// Messages sent to clients, both direct replies and room broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Error { message: String },
    UserJoined { user: User },
    UserLeft { user: User },
    RoomUpdated { room: Room },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
    pub topic: Option<String>,
    #[serde(rename = "creatorId")]
    pub creator_id: String,
}

#[derive(Debug, Serialize)]
pub struct RoomDetailsResponse {
    #[serde(flatten)]
    pub room: Room,
    #[serde(rename = "participantCount")]
    pub participant_count: i64,
}
