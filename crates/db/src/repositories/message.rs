use sqlx::{Row, SqliteConnection};

use negotiator_core::domain::conversation::ChatMessage;

use super::{parse_enum, parse_timestamp, timestamp, RepositoryError};
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn append(
        &self,
        conversation_id: i64,
        message: &ChatMessage,
    ) -> Result<i64, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        append_with(&mut conn, conversation_id, message).await
    }

    /// The last `limit` messages, oldest first.
    pub async fn recent(
        &self,
        conversation_id: i64,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT role, content, created_at FROM (
                 SELECT id, role, content, created_at
                 FROM messages
                 WHERE conversation_id = ?
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?
             )
             ORDER BY created_at ASC, id ASC",
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect()
    }
}

pub(crate) async fn append_with(
    conn: &mut SqliteConnection,
    conversation_id: i64,
    message: &ChatMessage,
) -> Result<i64, RepositoryError> {
    let result = sqlx::query(
        "INSERT INTO messages (conversation_id, role, content, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(conversation_id)
    .bind(message.role.as_str())
    .bind(&message.content)
    .bind(timestamp(&message.created_at))
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<ChatMessage, RepositoryError> {
    let role: String = row.try_get("role").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let content: String =
        row.try_get("content").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(ChatMessage {
        role: parse_enum("role", &role)?,
        content,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}
