use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use sqlx::mysql::MySqlPoolOptions;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use userroom_backend::api::rooms;
use userroom_backend::config::Config;
use userroom_backend::registry::ConnectionRegistry;
use userroom_backend::services::{AppState, DbRoomCommands, DbRoomService, DbUserService};
use userroom_backend::tasks::{RedisTaskQueue, TaskWorker};
use userroom_backend::websocket;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing: stdout plus a daily-rolling log file
    let (file_writer, _guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily("logs", "userroom.log"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    let config = Config::from_env()?;

    let db_pool = MySqlPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&db_pool).await?;

    let registry = Arc::new(ConnectionRegistry::new());
    let scheduler = Arc::new(RedisTaskQueue::new(&config.redis_url)?);

    // Deactivation tasks are executed out-of-band by the queue worker
    let worker = TaskWorker::new(
        &config.redis_url,
        db_pool.clone(),
        Duration::from_secs(config.task_poll_interval_seconds),
    )?;
    tokio::spawn(worker.run());

    let app_state = Arc::new(AppState {
        config: config.clone(),
        rooms: Arc::new(DbRoomService::new(db_pool.clone())),
        users: Arc::new(DbUserService::new(db_pool.clone())),
        commands: Arc::new(DbRoomCommands::new(db_pool, registry.clone())),
        scheduler,
        registry,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/rooms", post(rooms::create_room))
        .route("/api/rooms/{id}", get(rooms::get_room))
        .route("/ws/{room_id}", get(websocket::handler))
        .layer(Extension(app_state))
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on {}", addr);
    axum_server::bind(addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
