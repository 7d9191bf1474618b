use chrono::Utc;
use sqlx::{Row, SqliteConnection};

use negotiator_core::domain::conversation::{ConversationState, Platform};

use super::{parse_enum, timestamp, to_signed, to_unsigned, RepositoryError};
use crate::DbPool;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InfluencerRecord {
    pub id: i64,
    pub phone: String,
    pub name: Option<String>,
    pub platform: Option<Platform>,
    pub niche: Option<String>,
    pub avg_views: Option<u64>,
}

/// Profile facts learned during qualification. Stored only where the column is still empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InfluencerProfileUpdate {
    pub platform: Option<Platform>,
    pub niche: Option<String>,
    pub avg_views: Option<u64>,
}

impl InfluencerProfileUpdate {
    pub fn from_state(state: &ConversationState) -> Self {
        Self {
            platform: state.qualification.platform,
            niche: state.qualification.niche.clone(),
            avg_views: state.qualification.avg_views,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.platform.is_none() && self.niche.is_none() && self.avg_views.is_none()
    }
}

pub struct SqlInfluencerRepository {
    pool: DbPool,
}

impl SqlInfluencerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get_or_create(&self, phone: &str) -> Result<InfluencerRecord, RepositoryError> {
        sqlx::query(
            "INSERT INTO influencers (phone, created_at) VALUES (?, ?)
             ON CONFLICT(phone) DO NOTHING",
        )
        .bind(phone)
        .bind(timestamp(&Utc::now()))
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT id, phone, name, platform, niche, avg_views FROM influencers WHERE phone = ?",
        )
        .bind(phone)
        .fetch_one(&self.pool)
        .await?;

        row_to_influencer(&row)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<InfluencerRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, phone, name, platform, niche, avg_views FROM influencers WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_influencer(r)?)),
            None => Ok(None),
        }
    }

    pub async fn update_profile(
        &self,
        id: i64,
        update: &InfluencerProfileUpdate,
    ) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        update_profile_with(&mut conn, id, update).await
    }
}

pub(crate) async fn update_profile_with(
    conn: &mut SqliteConnection,
    id: i64,
    update: &InfluencerProfileUpdate,
) -> Result<(), RepositoryError> {
    if update.is_empty() {
        return Ok(());
    }

    let avg_views = update.avg_views.map(|views| to_signed("avg_views", views)).transpose()?;

    let result = sqlx::query(
        "UPDATE influencers SET
             platform = COALESCE(NULLIF(platform, ''), ?),
             niche = COALESCE(NULLIF(niche, ''), ?),
             avg_views = COALESCE(NULLIF(avg_views, 0), ?)
         WHERE id = ?",
    )
    .bind(update.platform.map(|platform| platform.as_str()))
    .bind(update.niche.as_deref())
    .bind(avg_views)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound(format!("influencer {id}")));
    }
    Ok(())
}

fn row_to_influencer(row: &sqlx::sqlite::SqliteRow) -> Result<InfluencerRecord, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let phone: String = row.try_get("phone").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let name: Option<String> =
        row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let platform: Option<String> =
        row.try_get("platform").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let niche: Option<String> =
        row.try_get("niche").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let avg_views: Option<i64> =
        row.try_get("avg_views").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(InfluencerRecord {
        id,
        phone,
        name,
        platform: platform
            .filter(|value| !value.is_empty())
            .map(|value| parse_enum("platform", &value))
            .transpose()?,
        niche,
        avg_views: avg_views.map(|views| to_unsigned("avg_views", views)).transpose()?,
    })
}
