//! End-to-end dispatch tests: a real router and socket, doubled services.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{extract::Extension, routing::get, Router};
use futures::{SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use userroom_backend::config::Config;
use userroom_backend::error::ServiceError;
use userroom_backend::models::{Room, ServerMessage, User};
use userroom_backend::registry::ConnectionRegistry;
use userroom_backend::services::{AppState, RoomCommands, RoomService, UserService};
use userroom_backend::tasks::{DelayedTask, TaskScheduler};
use userroom_backend::websocket;

struct FixedRooms {
    rooms: Mutex<HashMap<String, Room>>,
    participant_count: Mutex<i64>,
}

impl FixedRooms {
    fn with_room(room_id: &str) -> Self {
        let room = Room {
            id: room_id.to_string(),
            name: "English practice".to_string(),
            topic: None,
            creator_id: "creator-1".to_string(),
            is_active: true,
            created_at: "2024-01-01T00:00:00+00:00".to_string(),
        };
        let mut rooms = HashMap::new();
        rooms.insert(room.id.clone(), room);
        Self {
            rooms: Mutex::new(rooms),
            participant_count: Mutex::new(0),
        }
    }
}

#[async_trait]
impl RoomService for FixedRooms {
    async fn get_room(&self, room_id: &str) -> Result<Option<Room>, ServiceError> {
        Ok(self.rooms.lock().unwrap().get(room_id).cloned())
    }

    async fn count_participants(&self, _room: &Room) -> Result<i64, ServiceError> {
        Ok(*self.participant_count.lock().unwrap())
    }

    async fn create_room(
        &self,
        _name: &str,
        _topic: Option<&str>,
        _creator_id: &str,
    ) -> Result<Room, ServiceError> {
        unimplemented!("not exercised over the socket")
    }
}

struct FixedUsers {
    tokens: HashMap<String, User>,
}

impl FixedUsers {
    fn with_token(token: &str, user_id: &str) -> Self {
        let user = User {
            id: user_id.to_string(),
            username: format!("user-{user_id}"),
            display_name: format!("User {user_id}"),
        };
        let mut tokens = HashMap::new();
        tokens.insert(token.to_string(), user);
        Self { tokens }
    }
}

#[async_trait]
impl UserService for FixedUsers {
    async fn get_user_from_token(&self, token: &str) -> Result<Option<User>, ServiceError> {
        Ok(self.tokens.get(token).cloned())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum CommandCall {
    Join(String, Option<String>),
    Leave(String, Option<String>),
}

#[derive(Default)]
struct RecordingCommands {
    calls: Mutex<Vec<CommandCall>>,
}

#[async_trait]
impl RoomCommands for RecordingCommands {
    async fn handle_join_room(
        &self,
        room_id: &str,
        user: Option<&User>,
    ) -> Result<(), ServiceError> {
        self.calls.lock().unwrap().push(CommandCall::Join(
            room_id.to_string(),
            user.map(|u| u.id.clone()),
        ));
        Ok(())
    }

    async fn handle_leave_room(
        &self,
        room_id: &str,
        user: Option<&User>,
    ) -> Result<(), ServiceError> {
        self.calls.lock().unwrap().push(CommandCall::Leave(
            room_id.to_string(),
            user.map(|u| u.id.clone()),
        ));
        Ok(())
    }

    async fn handle_edit_room(
        &self,
        _room_id: &str,
        _user: Option<&User>,
        _data: serde_json::Value,
    ) -> Result<(), ServiceError> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingScheduler {
    scheduled: Mutex<Vec<(DelayedTask, Duration)>>,
}

#[async_trait]
impl TaskScheduler for RecordingScheduler {
    async fn schedule_delayed(&self, task: DelayedTask, delay: Duration) -> Result<(), ServiceError> {
        self.scheduled.lock().unwrap().push((task, delay));
        Ok(())
    }
}

struct TestServer {
    addr: SocketAddr,
    rooms: Arc<FixedRooms>,
    commands: Arc<RecordingCommands>,
    scheduler: Arc<RecordingScheduler>,
}

impl TestServer {
    async fn start(rooms: FixedRooms, users: FixedUsers) -> Self {
        let rooms = Arc::new(rooms);
        let commands = Arc::new(RecordingCommands::default());
        let scheduler = Arc::new(RecordingScheduler::default());
        let state = Arc::new(AppState {
            config: Config {
                database_url: String::new(),
                redis_url: String::new(),
                port: 0,
                deactivation_delay_seconds: 15,
                task_poll_interval_seconds: 1,
            },
            rooms: rooms.clone(),
            users: Arc::new(users),
            commands: commands.clone(),
            scheduler: scheduler.clone(),
            registry: Arc::new(ConnectionRegistry::new()),
        });

        let app = Router::new()
            .route("/ws/{room_id}", get(websocket::handler))
            .layer(Extension(state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            rooms,
            commands,
            scheduler,
        }
    }

    fn ws_url(&self, room_id: &str) -> String {
        format!("ws://{}/ws/{}", self.addr, room_id)
    }
}

async fn recv_server_message(
    ws: &mut (impl Stream<Item = Result<Message, tungstenite::Error>> + Unpin),
) -> serde_json::Value {
    let message = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out waiting for a server message")
        .expect("socket closed")
        .expect("socket error");
    serde_json::from_str(message.into_text().unwrap().as_str()).unwrap()
}

async fn assert_silent(
    ws: &mut (impl Stream<Item = Result<Message, tungstenite::Error>> + Unpin),
) {
    let outcome = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(outcome.is_err(), "expected no server message, got {outcome:?}");
}

#[tokio::test]
async fn connect_to_unknown_room_is_rejected() {
    let server = TestServer::start(
        FixedRooms::with_room("room-1"),
        FixedUsers::with_token("tok", "u1"),
    )
    .await;

    let result = connect_async(server.ws_url("no-such-room")).await;
    match result {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 404);
        }
        other => panic!("expected an HTTP rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn connect_to_existing_room_is_accepted() {
    let server = TestServer::start(
        FixedRooms::with_room("room-1"),
        FixedUsers::with_token("tok", "u1"),
    )
    .await;

    let (mut ws, _) = connect_async(server.ws_url("room-1")).await.unwrap();
    assert_silent(&mut ws).await;
}

#[tokio::test]
async fn malformed_and_unknown_frames_get_error_envelopes() {
    let server = TestServer::start(
        FixedRooms::with_room("room-1"),
        FixedUsers::with_token("tok", "u1"),
    )
    .await;

    let (mut ws, _) = connect_async(server.ws_url("room-1")).await.unwrap();

    ws.send(Message::text("{broken")).await.unwrap();
    let reply = recv_server_message(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["message"], "Invalid JSON");

    // Same connection is still serviced
    ws.send(Message::text(r#"{"type":"mystery"}"#)).await.unwrap();
    let reply = recv_server_message(&mut ws).await;
    assert_eq!(reply["message"], "Unknown message type");

    ws.send(Message::text(r#"{"type":"joinRoom","token":"wrong"}"#))
        .await
        .unwrap();
    let reply = recv_server_message(&mut ws).await;
    assert_eq!(reply["message"], "Invalid token.");
    assert!(server.commands.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn join_then_disconnect_schedules_room_deactivation() {
    let server = TestServer::start(
        FixedRooms::with_room("room-1"),
        FixedUsers::with_token("tok", "u1"),
    )
    .await;

    let (mut ws, _) = connect_async(server.ws_url("room-1")).await.unwrap();
    ws.send(Message::text(r#"{"type":"joinRoom","token":"tok"}"#))
        .await
        .unwrap();
    assert_silent(&mut ws).await;

    ws.close(None).await.unwrap();
    drop(ws);

    // Disconnect cleanup runs on the server after the close frame
    for _ in 0..20 {
        if !server.scheduler.scheduled.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let calls = server.commands.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![
            CommandCall::Join("room-1".to_string(), Some("u1".to_string())),
            CommandCall::Leave("room-1".to_string(), Some("u1".to_string())),
        ]
    );
    let scheduled = server.scheduler.scheduled.lock().unwrap().clone();
    assert_eq!(
        scheduled,
        vec![(
            DelayedTask::DeactivateRoomIfEmpty {
                room_id: "room-1".to_string()
            },
            Duration::from_secs(15)
        )]
    );
}

#[tokio::test]
async fn disconnect_with_remaining_participants_schedules_nothing() {
    let server = TestServer::start(
        FixedRooms::with_room("room-1"),
        FixedUsers::with_token("tok", "u1"),
    )
    .await;
    *server.rooms.participant_count.lock().unwrap() = 1;

    let (mut ws, _) = connect_async(server.ws_url("room-1")).await.unwrap();
    ws.send(Message::text(r#"{"type":"joinRoom","token":"tok"}"#))
        .await
        .unwrap();
    assert_silent(&mut ws).await;

    ws.close(None).await.unwrap();
    drop(ws);

    for _ in 0..20 {
        let calls = server.commands.calls.lock().unwrap().clone();
        if calls.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert!(server.scheduler.scheduled.lock().unwrap().is_empty());
}
