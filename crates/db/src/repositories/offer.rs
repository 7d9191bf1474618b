use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};

use negotiator_core::domain::offer::OfferRecord;

use super::{money, parse_money, parse_timestamp, timestamp, RepositoryError};
use crate::DbPool;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredOffer {
    pub id: i64,
    pub conversation_id: i64,
    pub offer: OfferRecord,
    pub created_at: DateTime<Utc>,
}

pub struct SqlOfferRepository {
    pool: DbPool,
}

impl SqlOfferRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        conversation_id: i64,
        offer: &OfferRecord,
    ) -> Result<i64, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        insert_with(&mut conn, conversation_id, offer).await
    }

    /// Oldest first.
    pub async fn list_for_conversation(
        &self,
        conversation_id: i64,
    ) -> Result<Vec<StoredOffer>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, floor_price, target_price, ceiling_price,
                    proposed_price, accepted, created_at
             FROM offers WHERE conversation_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_offer).collect()
    }
}

pub(crate) async fn insert_with(
    conn: &mut SqliteConnection,
    conversation_id: i64,
    offer: &OfferRecord,
) -> Result<i64, RepositoryError> {
    let result = sqlx::query(
        "INSERT INTO offers (conversation_id, floor_price, target_price, ceiling_price,
                             proposed_price, accepted, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(conversation_id)
    .bind(money(offer.floor))
    .bind(money(offer.target))
    .bind(money(offer.ceiling))
    .bind(offer.proposed.map(money))
    .bind(offer.accepted)
    .bind(timestamp(&Utc::now()))
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

fn row_to_offer(row: &sqlx::sqlite::SqliteRow) -> Result<StoredOffer, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let conversation_id: i64 =
        row.try_get("conversation_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let floor: String =
        row.try_get("floor_price").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let target: String =
        row.try_get("target_price").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let ceiling: String =
        row.try_get("ceiling_price").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let proposed: Option<String> =
        row.try_get("proposed_price").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let accepted: Option<bool> =
        row.try_get("accepted").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(StoredOffer {
        id,
        conversation_id,
        offer: OfferRecord {
            floor: parse_money("floor_price", &floor)?,
            target: parse_money("target_price", &target)?,
            ceiling: parse_money("ceiling_price", &ceiling)?,
            proposed: proposed.map(|value| parse_money("proposed_price", &value)).transpose()?,
            accepted,
        },
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}
