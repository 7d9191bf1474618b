use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use negotiator_core::domain::benchmark::HistoricalDeal;
use negotiator_core::domain::conversation::{DeliverableType, Platform};

use crate::connection::DbPool;
use crate::repositories::{deal, money, RepositoryError};

use DeliverableType::{Post, Reel, Story, Video};
use Platform::{Instagram, TikTok, YouTube};

struct SeedDeal {
    influencer_name: &'static str,
    platform: Platform,
    niche: &'static str,
    deliverable_type: DeliverableType,
    quantity: u32,
    avg_views: u64,
    final_price: i64,
}

const fn seed(
    influencer_name: &'static str,
    platform: Platform,
    niche: &'static str,
    deliverable_type: DeliverableType,
    quantity: u32,
    avg_views: u64,
    final_price: i64,
) -> SeedDeal {
    SeedDeal { influencer_name, platform, niche, deliverable_type, quantity, avg_views, final_price }
}

/// Closed deals that give benchmark lookups something to work with on a fresh database.
const SEED_DEALS: &[SeedDeal] = &[
    seed("Ana Fitness", Instagram, "fitness", Reel, 1, 80_000, 3200),
    seed("Bruno Shape", Instagram, "fitness", Post, 1, 120_000, 4800),
    seed("Carla Yoga", TikTok, "fitness", Video, 1, 50_000, 1500),
    seed("Duda Fashion", Instagram, "moda", Reel, 2, 150_000, 9000),
    seed("Edu Style", TikTok, "moda", Video, 1, 90_000, 3600),
    seed("Fabi Glam", Instagram, "beleza", Story, 3, 60_000, 2700),
    seed("Gabi Makeup", Instagram, "beleza", Reel, 1, 200_000, 8000),
    seed("Hugo Tech", YouTube, "tech", Video, 1, 100_000, 6000),
    seed("Igor Reviews", YouTube, "tech", Video, 1, 250_000, 15000),
    seed("Julia Comedy", TikTok, "humor", Video, 2, 300_000, 12000),
    seed("Kaio Gamer", YouTube, "games", Video, 1, 180_000, 9000),
    seed("Lara Chef", Instagram, "culinaria", Reel, 1, 70_000, 2800),
    seed("Manu Viaja", Instagram, "viagem", Post, 2, 95_000, 5700),
    seed("Neto Finance", YouTube, "financas", Video, 1, 130_000, 7800),
    seed("Oli Fitness", TikTok, "fitness", Video, 1, 45_000, 1350),
    seed("Paula Moda", Instagram, "moda", Story, 4, 110_000, 6600),
    seed("Quinn Beauty", TikTok, "beleza", Video, 1, 75_000, 2250),
    seed("Rafa Humor", Instagram, "humor", Reel, 1, 160_000, 6400),
    seed("Sofia Cook", TikTok, "culinaria", Video, 1, 55_000, 1650),
    seed("Tiago Travel", YouTube, "viagem", Video, 1, 220_000, 13200),
];

/// Deterministic historical deals for local runs and tests.
pub struct DealSeedDataset;

impl DealSeedDataset {
    pub fn len() -> usize {
        SEED_DEALS.len()
    }

    /// The seed rows as domain values, closed on consecutive days ending eleven days before `now`.
    pub fn deals(now: DateTime<Utc>) -> Vec<HistoricalDeal> {
        SEED_DEALS
            .iter()
            .zip(0_i64..)
            .map(|(seed, offset)| {
                HistoricalDeal::new(
                    seed.influencer_name,
                    seed.platform,
                    seed.niche,
                    seed.deliverable_type,
                    seed.quantity,
                    seed.avg_views,
                    Decimal::from(seed.final_price),
                    now - Duration::days(30 - offset),
                )
            })
            .collect()
    }

    /// Inserts the seed deals unless the table already holds any deal.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deals").fetch_one(pool).await?;
        if existing > 0 {
            return Ok(SeedResult { inserted: 0, existing });
        }

        let mut tx = pool.begin().await?;
        for record in Self::deals(Utc::now()) {
            deal::insert_with(&mut tx, &record).await?;
        }
        tx.commit().await?;

        Ok(SeedResult { inserted: SEED_DEALS.len(), existing })
    }

    /// Checks that every seed deal is present with its price.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::with_capacity(SEED_DEALS.len());

        for seed in SEED_DEALS {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM deals
                               WHERE influencer_name = ?1 AND platform = ?2
                                 AND deliverable_type = ?3 AND final_price = ?4)",
            )
            .bind(seed.influencer_name)
            .bind(seed.platform.as_str())
            .bind(seed.deliverable_type.as_str())
            .bind(money(Decimal::from(seed.final_price)))
            .fetch_one(pool)
            .await?;
            checks.push((seed.influencer_name, present == 1));
        }

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub inserted: usize,
    /// Deals already stored before the seed ran.
    pub existing: i64,
}

#[derive(Clone, Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

impl VerificationResult {
    pub fn missing(&self) -> Vec<&'static str> {
        self.checks.iter().filter(|(_, present)| !present).map(|(name, _)| *name).collect()
    }
}
