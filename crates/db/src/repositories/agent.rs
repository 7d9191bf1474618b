use chrono::Utc;
use sqlx::Row;

use negotiator_core::domain::agent::AgentProfile;

use super::{money, timestamp, RepositoryError};
use crate::DbPool;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentRecord {
    pub agent_id: String,
    pub name: String,
    pub persona: String,
}

pub struct SqlAgentRepository {
    pool: DbPool,
}

impl SqlAgentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Registers the profile on first sight; an existing row is returned untouched.
    pub async fn get_or_create(
        &self,
        profile: &AgentProfile,
    ) -> Result<AgentRecord, RepositoryError> {
        sqlx::query(
            "INSERT INTO agents (agent_id, name, persona, target_rate, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(agent_id) DO NOTHING",
        )
        .bind(&profile.agent_id)
        .bind(&profile.name)
        .bind(&profile.persona)
        .bind(money(profile.target_rate))
        .bind(timestamp(&Utc::now()))
        .execute(&self.pool)
        .await?;

        self.find(&profile.agent_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("agent {}", profile.agent_id)))
    }

    pub async fn find(&self, agent_id: &str) -> Result<Option<AgentRecord>, RepositoryError> {
        let row = sqlx::query("SELECT agent_id, name, persona FROM agents WHERE agent_id = ?")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_agent(r)?)),
            None => Ok(None),
        }
    }
}

fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> Result<AgentRecord, RepositoryError> {
    Ok(AgentRecord {
        agent_id: row.try_get("agent_id").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        name: row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        persona: row.try_get("persona").map_err(|e| RepositoryError::Decode(e.to_string()))?,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use negotiator_core::domain::agent::AgentProfile;

    use super::SqlAgentRepository;
    use crate::repositories::test_support::memory_pool;

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let repo = SqlAgentRepository::new(memory_pool().await);
        let profile = AgentProfile::default_negotiator(Decimal::from(40));

        let first = repo.get_or_create(&profile).await.expect("first");
        let renamed = AgentProfile { name: "Outro Nome".to_owned(), ..profile };
        let second = repo.get_or_create(&renamed).await.expect("second");

        assert_eq!(first, second);
        assert_eq!(second.name, "Negociador de Influenciadores");
    }

    #[tokio::test]
    async fn unknown_agent_is_none() {
        let repo = SqlAgentRepository::new(memory_pool().await);
        assert_eq!(repo.find("ghost").await.expect("query"), None);
    }
}
