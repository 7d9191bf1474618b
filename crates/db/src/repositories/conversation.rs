use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};

use negotiator_core::domain::conversation::{ConversationStatus, Owner, ThreadId};

use super::{parse_enum, parse_timestamp, timestamp, RepositoryError};
use crate::DbPool;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationRecord {
    pub id: i64,
    pub thread_id: ThreadId,
    pub agent_id: String,
    pub influencer_id: i64,
    pub influencer_phone: String,
    pub status: ConversationStatus,
    pub owner: Owner,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One line of `list-conversations` output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationSummary {
    pub record: ConversationRecord,
    pub message_count: i64,
}

const SELECT_CONVERSATION: &str =
    "SELECT c.id, c.thread_id, c.agent_id, c.influencer_id, i.phone AS influencer_phone,
            c.status, c.owner, c.created_at, c.updated_at
     FROM conversations c
     JOIN influencers i ON i.id = c.influencer_id";

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        agent_id: &str,
        influencer_id: i64,
    ) -> Result<ConversationRecord, RepositoryError> {
        let thread_id = ThreadId::generate();
        let now = timestamp(&Utc::now());

        sqlx::query(
            "INSERT INTO conversations
                 (thread_id, agent_id, influencer_id, status, owner, created_at, updated_at)
             VALUES (?, ?, ?, 'active', 'agent', ?, ?)",
        )
        .bind(thread_id.as_str())
        .bind(agent_id)
        .bind(influencer_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.find_by_thread(&thread_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("conversation {thread_id}")))
    }

    /// Most recent active conversation between the agent and the influencer.
    pub async fn find_active(
        &self,
        agent_id: &str,
        influencer_id: i64,
    ) -> Result<Option<ConversationRecord>, RepositoryError> {
        let sql = format!(
            "{SELECT_CONVERSATION}
             WHERE c.agent_id = ? AND c.influencer_id = ? AND c.status = 'active'
             ORDER BY c.created_at DESC, c.id DESC
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(agent_id)
            .bind(influencer_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_conversation(r)?)),
            None => Ok(None),
        }
    }

    pub async fn find_by_thread(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Option<ConversationRecord>, RepositoryError> {
        let sql = format!("{SELECT_CONVERSATION} WHERE c.thread_id = ?");
        let row = sqlx::query(&sql).bind(thread_id.as_str()).fetch_optional(&self.pool).await?;

        match row {
            Some(ref r) => Ok(Some(row_to_conversation(r)?)),
            None => Ok(None),
        }
    }

    /// Newest first.
    pub async fn list(&self, limit: u32) -> Result<Vec<ConversationSummary>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT c.id, c.thread_id, c.agent_id, c.influencer_id, i.phone AS influencer_phone,
                    c.status, c.owner, c.created_at, c.updated_at,
                    (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id)
                        AS message_count
             FROM conversations c
             JOIN influencers i ON i.id = c.influencer_id
             ORDER BY c.created_at DESC, c.id DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let message_count: i64 = row
                    .try_get("message_count")
                    .map_err(|e| RepositoryError::Decode(e.to_string()))?;
                Ok(ConversationSummary { record: row_to_conversation(row)?, message_count })
            })
            .collect()
    }

    pub async fn update_owner(&self, id: i64, owner: Owner) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        update_owner_with(&mut conn, id, owner).await
    }

    pub async fn update_status(
        &self,
        id: i64,
        status: ConversationStatus,
    ) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        update_status_with(&mut conn, id, status).await
    }
}

pub(crate) async fn update_owner_with(
    conn: &mut SqliteConnection,
    id: i64,
    owner: Owner,
) -> Result<(), RepositoryError> {
    let result = sqlx::query("UPDATE conversations SET owner = ?, updated_at = ? WHERE id = ?")
        .bind(owner.as_str())
        .bind(timestamp(&Utc::now()))
        .bind(id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound(format!("conversation {id}")));
    }
    Ok(())
}

pub(crate) async fn update_status_with(
    conn: &mut SqliteConnection,
    id: i64,
    status: ConversationStatus,
) -> Result<(), RepositoryError> {
    let result = sqlx::query("UPDATE conversations SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(timestamp(&Utc::now()))
        .bind(id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound(format!("conversation {id}")));
    }
    Ok(())
}

fn row_to_conversation(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<ConversationRecord, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let thread_id: String =
        row.try_get("thread_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let agent_id: String =
        row.try_get("agent_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let influencer_id: i64 =
        row.try_get("influencer_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let influencer_phone: String =
        row.try_get("influencer_phone").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let owner: String = row.try_get("owner").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(ConversationRecord {
        id,
        thread_id: ThreadId(thread_id),
        agent_id,
        influencer_id,
        influencer_phone,
        status: parse_enum("status", &status)?,
        owner: parse_enum("owner", &owner)?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use negotiator_core::domain::agent::AgentProfile;
    use negotiator_core::domain::conversation::{ConversationStatus, Owner, ThreadId};

    use super::SqlConversationRepository;
    use crate::repositories::test_support::memory_pool;
    use crate::repositories::{RepositoryError, SqlAgentRepository, SqlInfluencerRepository};
    use crate::DbPool;

    async fn seeded() -> (DbPool, i64) {
        let pool = memory_pool().await;
        SqlAgentRepository::new(pool.clone())
            .get_or_create(&AgentProfile::default_negotiator(Decimal::from(40)))
            .await
            .expect("agent");
        let influencer = SqlInfluencerRepository::new(pool.clone())
            .get_or_create("+5511977776666")
            .await
            .expect("influencer");
        (pool, influencer.id)
    }

    #[tokio::test]
    async fn create_then_find_active_and_by_thread() {
        let (pool, influencer_id) = seeded().await;
        let repo = SqlConversationRepository::new(pool);

        let created = repo.create("negotiator", influencer_id).await.expect("create");
        assert_eq!(created.status, ConversationStatus::Active);
        assert_eq!(created.owner, Owner::Agent);
        assert_eq!(created.influencer_phone, "+5511977776666");
        assert_eq!(created.thread_id.as_str().len(), 36);

        let active = repo.find_active("negotiator", influencer_id).await.expect("active");
        assert_eq!(active.as_ref().map(|c| c.id), Some(created.id));

        let by_thread = repo.find_by_thread(&created.thread_id).await.expect("thread");
        assert_eq!(by_thread, Some(created));
    }

    #[tokio::test]
    async fn closed_conversations_are_not_active() {
        let (pool, influencer_id) = seeded().await;
        let repo = SqlConversationRepository::new(pool);

        let created = repo.create("negotiator", influencer_id).await.expect("create");
        repo.update_status(created.id, ConversationStatus::Closed).await.expect("close");

        assert_eq!(repo.find_active("negotiator", influencer_id).await.expect("active"), None);
    }

    #[tokio::test]
    async fn owner_update_is_persisted_and_listed() {
        let (pool, influencer_id) = seeded().await;
        let repo = SqlConversationRepository::new(pool);

        let first = repo.create("negotiator", influencer_id).await.expect("first");
        let second = repo.create("negotiator", influencer_id).await.expect("second");
        repo.update_owner(first.id, Owner::Human).await.expect("owner");

        let listed = repo.list(10).await.expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].record.id, second.id);
        assert_eq!(listed[1].record.owner, Owner::Human);
        assert_eq!(listed[1].message_count, 0);
    }

    #[tokio::test]
    async fn updating_a_missing_conversation_is_not_found() {
        let (pool, _) = seeded().await;
        let repo = SqlConversationRepository::new(pool);

        assert!(matches!(
            repo.update_owner(999, Owner::Human).await,
            Err(RepositoryError::NotFound(_))
        ));
        assert_eq!(
            repo.find_by_thread(&ThreadId("missing".to_owned())).await.expect("query"),
            None
        );
    }
}
