use sqlx::{query, query_as, MySql, Pool};
use chrono::Utc;
use uuid::Uuid;

use crate::models::{Room, User};

pub async fn get_room(pool: &Pool<MySql>, room_id: &str) -> Result<Option<Room>, sqlx::Error> {
    // Using dynamic queries to avoid a compile-time database connection
    query_as::<_, Room>(
        r#"
        SELECT id, name, topic, creator_id, is_active, created_at
        FROM rooms
        WHERE id = ? AND is_active = TRUE
        "#,
    )
    .bind(room_id)
    .fetch_optional(pool)
    .await
}

pub async fn create_room(
    pool: &Pool<MySql>,
    name: &str,
    topic: Option<&str>,
    creator_id: &str,
) -> Result<Room, sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();

    query(
        r#"
        INSERT INTO rooms (id, name, topic, creator_id, is_active, created_at)
        VALUES (?, ?, ?, ?, TRUE, ?)
        "#,
    )
    .bind(&id)
    .bind(name)
    .bind(topic)
    .bind(creator_id)
    .bind(&created_at)
    .execute(pool)
    .await?;

    // The creator joins implicitly
    add_participant(pool, &id, creator_id).await?;

    query_as::<_, Room>(
        r#"
        SELECT id, name, topic, creator_id, is_active, created_at
        FROM rooms
        WHERE id = ?
        "#,
    )
    .bind(&id)
    .fetch_one(pool)
    .await
}

pub async fn count_participants(pool: &Pool<MySql>, room_id: &str) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = query_as(
        r#"
        SELECT COUNT(*) FROM room_participants WHERE room_id = ?
        "#,
    )
    .bind(room_id)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

pub async fn get_user_by_token(
    pool: &Pool<MySql>,
    token: &str,
) -> Result<Option<User>, sqlx::Error> {
    query_as::<_, User>(
        r#"
        SELECT u.id, u.username, u.display_name
        FROM users u
        INNER JOIN user_tokens t ON t.user_id = u.id
        WHERE t.token = ?
        "#,
    )
    .bind(token)
    .fetch_optional(pool)
    .await
}

/// Returns false if the user was already a participant.
pub async fn add_participant(
    pool: &Pool<MySql>,
    room_id: &str,
    user_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = query(
        r#"
        INSERT IGNORE INTO room_participants (room_id, user_id, joined_at)
        VALUES (?, ?, ?)
        "#,
    )
    .bind(room_id)
    .bind(user_id)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Returns false if the user was not a participant.
pub async fn remove_participant(
    pool: &Pool<MySql>,
    room_id: &str,
    user_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = query(
        r#"
        DELETE FROM room_participants
        WHERE room_id = ? AND user_id = ?
        "#,
    )
    .bind(room_id)
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn update_room(
    pool: &Pool<MySql>,
    room_id: &str,
    name: Option<&str>,
    topic: Option<&str>,
) -> Result<(), sqlx::Error> {
    query(
        r#"
        UPDATE rooms
        SET name = COALESCE(?, name), topic = COALESCE(?, topic)
        WHERE id = ?
        "#,
    )
    .bind(name)
    .bind(topic)
    .bind(room_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Marks the room inactive only if it still has no participants. Returns
/// whether a deactivation actually happened.
pub async fn deactivate_room_if_empty(
    pool: &Pool<MySql>,
    room_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = query(
        r#"
        UPDATE rooms
        SET is_active = FALSE
        WHERE id = ? AND is_active = TRUE
          AND NOT EXISTS (SELECT 1 FROM room_participants WHERE room_id = ?)
        "#,
    )
    .bind(room_id)
    .bind(room_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
