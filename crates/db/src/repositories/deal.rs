use async_trait::async_trait;
use sqlx::{Row, SqliteConnection};
use tracing::debug;

use negotiator_core::domain::benchmark::{BenchmarkSnapshot, HistoricalDeal};
use negotiator_core::domain::conversation::{DeliverableType, Platform};
use negotiator_core::errors::ApplicationError;
use negotiator_core::pricing::{summarize_deals, BenchmarkQuery, BenchmarkSource};

use super::{
    money, parse_enum, parse_money, parse_timestamp, timestamp, to_signed, to_unsigned,
    RepositoryError,
};
use crate::DbPool;

const SELECT_DEAL: &str = "SELECT id, influencer_name, platform, niche, deliverable_type, quantity,
                                  avg_views, final_price, rate, closed_at
                           FROM deals";

pub struct SqlDealRepository {
    pool: DbPool,
}

impl SqlDealRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, deal: &HistoricalDeal) -> Result<i64, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        insert_with(&mut conn, deal).await
    }

    pub async fn count(&self) -> Result<i64, RepositoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM deals").fetch_one(&self.pool).await?;
        Ok(count)
    }

    /// Deals for a platform and deliverable type, in storage order.
    pub async fn list_matching(
        &self,
        platform: Platform,
        deliverable_type: DeliverableType,
    ) -> Result<Vec<HistoricalDeal>, RepositoryError> {
        let sql = format!(
            "{SELECT_DEAL}
             WHERE LOWER(platform) = ? AND LOWER(deliverable_type) = ?
             ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(platform.as_str())
            .bind(deliverable_type.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_deal).collect()
    }
}

pub(crate) async fn insert_with(
    conn: &mut SqliteConnection,
    deal: &HistoricalDeal,
) -> Result<i64, RepositoryError> {
    let result = sqlx::query(
        "INSERT INTO deals (influencer_name, platform, niche, deliverable_type, quantity,
                            avg_views, final_price, rate, closed_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&deal.influencer_name)
    .bind(deal.platform.as_str())
    .bind(&deal.niche)
    .bind(deal.deliverable_type.as_str())
    .bind(deal.quantity)
    .bind(to_signed("avg_views", deal.avg_views)?)
    .bind(money(deal.final_price))
    .bind(money(deal.rate))
    .bind(timestamp(&deal.closed_at))
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

fn row_to_deal(row: &sqlx::sqlite::SqliteRow) -> Result<HistoricalDeal, RepositoryError> {
    let influencer_name: String =
        row.try_get("influencer_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let platform: String =
        row.try_get("platform").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let niche: String = row.try_get("niche").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let deliverable_type: String =
        row.try_get("deliverable_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let quantity: i64 =
        row.try_get("quantity").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let avg_views: i64 =
        row.try_get("avg_views").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let final_price: String =
        row.try_get("final_price").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let rate: String = row.try_get("rate").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let closed_at: String =
        row.try_get("closed_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(HistoricalDeal {
        influencer_name,
        platform: parse_enum("platform", &platform)?,
        niche,
        deliverable_type: parse_enum("deliverable_type", &deliverable_type)?,
        quantity: to_unsigned("quantity", quantity)?,
        avg_views: to_unsigned("avg_views", avg_views)?,
        final_price: parse_money("final_price", &final_price)?,
        rate: parse_money("rate", &rate)?,
        closed_at: parse_timestamp("closed_at", &closed_at)?,
    })
}

/// Benchmark lookup over the `deals` table.
pub struct SqlBenchmarkSource {
    deals: SqlDealRepository,
}

impl SqlBenchmarkSource {
    pub fn new(pool: DbPool) -> Self {
        Self { deals: SqlDealRepository::new(pool) }
    }
}

#[async_trait]
impl BenchmarkSource for SqlBenchmarkSource {
    async fn lookup(&self, query: &BenchmarkQuery) -> Result<BenchmarkSnapshot, ApplicationError> {
        let deals = self.deals.list_matching(query.platform, query.deliverable_type).await?;
        let snapshot = summarize_deals(&deals, query);
        debug!(
            event_name = "benchmark.lookup",
            platform = query.platform.as_str(),
            deliverable_type = query.deliverable_type.as_str(),
            candidates = deals.len(),
            matched = snapshot.count,
            "benchmark lookup finished"
        );
        Ok(snapshot)
    }
}
