use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::conversation::{DeliverableType, Platform};

/// A closed deal from the historical record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalDeal {
    pub influencer_name: String,
    pub platform: Platform,
    pub niche: String,
    pub deliverable_type: DeliverableType,
    pub quantity: u32,
    pub avg_views: u64,
    pub final_price: Decimal,
    pub rate: Decimal,
    pub closed_at: DateTime<Utc>,
}

impl HistoricalDeal {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        influencer_name: impl Into<String>,
        platform: Platform,
        niche: impl Into<String>,
        deliverable_type: DeliverableType,
        quantity: u32,
        avg_views: u64,
        final_price: Decimal,
        closed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            influencer_name: influencer_name.into(),
            platform,
            niche: niche.into(),
            deliverable_type,
            quantity,
            avg_views,
            final_price,
            rate: rate_per_thousand(final_price, avg_views, quantity),
            closed_at,
        }
    }

    pub fn sample(&self) -> DealSample {
        DealSample {
            influencer: self.influencer_name.clone(),
            avg_views: self.avg_views,
            price: self.final_price,
            rate: self.rate,
            niche: self.niche.clone(),
        }
    }
}

/// Price per thousand delivered views, rounded to cents. Zero audience yields zero.
pub fn rate_per_thousand(price: Decimal, avg_views: u64, quantity: u32) -> Decimal {
    let audience = Decimal::from(avg_views) * Decimal::from(quantity);
    if audience.is_zero() {
        return Decimal::ZERO;
    }
    (price / audience * Decimal::from(1000)).round_dp(2)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealSample {
    pub influencer: String,
    pub avg_views: u64,
    pub price: Decimal,
    pub rate: Decimal,
    pub niche: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkSnapshot {
    pub count: u32,
    pub average_rate: Option<Decimal>,
    pub median_price: Option<Decimal>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub samples: Vec<DealSample>,
}

impl BenchmarkSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_evidence(&self) -> bool {
        self.count > 0
    }
}
