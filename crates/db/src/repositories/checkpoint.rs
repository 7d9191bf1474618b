use async_trait::async_trait;
use sqlx::{Row, SqliteConnection};

use negotiator_core::domain::approval::ApprovalRequest;
use negotiator_core::domain::conversation::{ConversationState, ThreadId};
use negotiator_core::errors::ApplicationError;
use negotiator_core::flows::{Checkpoint, CheckpointStatus, CheckpointStore, Stage};

use super::{parse_timestamp, timestamp, RepositoryError};
use crate::DbPool;

/// Durable checkpoints keyed by thread id; one row per thread, overwritten on each save.
pub struct SqlCheckpointStore {
    pool: DbPool,
}

impl SqlCheckpointStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, RepositoryError> {
        let row = sqlx::query(
            "SELECT thread_id, stage, status, state_json, pending_approval_json, updated_at
             FROM flow_checkpoints WHERE thread_id = ?",
        )
        .bind(thread_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_checkpoint(r)?)),
            None => Ok(None),
        }
    }

    pub async fn upsert(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        save_with(&mut conn, checkpoint).await
    }
}

#[async_trait]
impl CheckpointStore for SqlCheckpointStore {
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, ApplicationError> {
        Ok(self.find(thread_id).await?)
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), ApplicationError> {
        Ok(self.upsert(checkpoint).await?)
    }
}

pub(crate) async fn save_with(
    conn: &mut SqliteConnection,
    checkpoint: &Checkpoint,
) -> Result<(), RepositoryError> {
    let state_json = serde_json::to_string(&checkpoint.state)
        .map_err(|e| RepositoryError::Decode(format!("state_json: {e}")))?;
    let pending_json = checkpoint
        .pending_approval
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| RepositoryError::Decode(format!("pending_approval_json: {e}")))?;

    sqlx::query(
        "INSERT INTO flow_checkpoints
             (thread_id, stage, status, state_json, pending_approval_json, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(thread_id) DO UPDATE SET
             stage = excluded.stage,
             status = excluded.status,
             state_json = excluded.state_json,
             pending_approval_json = excluded.pending_approval_json,
             updated_at = excluded.updated_at",
    )
    .bind(checkpoint.thread_id.as_str())
    .bind(checkpoint.stage.as_str())
    .bind(checkpoint.status.as_str())
    .bind(state_json)
    .bind(pending_json)
    .bind(timestamp(&checkpoint.saved_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn row_to_checkpoint(row: &sqlx::sqlite::SqliteRow) -> Result<Checkpoint, RepositoryError> {
    let thread_id: String =
        row.try_get("thread_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let stage: String = row.try_get("stage").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let state_json: String =
        row.try_get("state_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let pending_json: Option<String> =
        row.try_get("pending_approval_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let stage = Stage::parse(&stage)
        .ok_or_else(|| RepositoryError::Decode(format!("stage: unknown value `{stage}`")))?;
    let status = CheckpointStatus::parse(&status)
        .ok_or_else(|| RepositoryError::Decode(format!("status: unknown value `{status}`")))?;
    let state: ConversationState = serde_json::from_str(&state_json)
        .map_err(|e| RepositoryError::Decode(format!("state_json: {e}")))?;
    let pending_approval: Option<ApprovalRequest> = pending_json
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| RepositoryError::Decode(format!("pending_approval_json: {e}")))?;

    Ok(Checkpoint {
        thread_id: ThreadId(thread_id),
        stage,
        status,
        state,
        pending_approval,
        saved_at: parse_timestamp("updated_at", &updated_at)?,
    })
}
