use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::benchmark::{BenchmarkSnapshot, HistoricalDeal};
use crate::domain::conversation::{DeliverableType, Platform};
use crate::errors::ApplicationError;

pub const DEFAULT_SAMPLE_SIZE: usize = 5;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkQuery {
    pub platform: Platform,
    pub deliverable_type: DeliverableType,
    pub target_views: u64,
    pub niche: Option<String>,
    pub k: usize,
}

impl BenchmarkQuery {
    pub fn new(platform: Platform, deliverable_type: DeliverableType, target_views: u64) -> Self {
        Self { platform, deliverable_type, target_views, niche: None, k: DEFAULT_SAMPLE_SIZE }
    }

    pub fn with_niche(mut self, niche: Option<String>) -> Self {
        self.niche =
            niche.map(|value| value.trim().to_lowercase()).filter(|value| !value.is_empty());
        self
    }

    pub fn with_sample_size(mut self, k: usize) -> Self {
        self.k = k;
        self
    }
}

/// Read-only access to the historical deals record.
#[async_trait]
pub trait BenchmarkSource: Send + Sync {
    async fn lookup(&self, query: &BenchmarkQuery) -> Result<BenchmarkSnapshot, ApplicationError>;
}

/// Summarizes `deals` (in storage order) for `query`.
///
/// Deals must match platform and deliverable type. The niche narrows the set only when at
/// least one deal carries it. Statistics cover every matching deal; samples are the `k`
/// deals nearest in views, ties kept in storage order.
pub fn summarize_deals(deals: &[HistoricalDeal], query: &BenchmarkQuery) -> BenchmarkSnapshot {
    let mut matching: Vec<&HistoricalDeal> = deals
        .iter()
        .filter(|deal| {
            deal.platform == query.platform && deal.deliverable_type == query.deliverable_type
        })
        .collect();

    if let Some(niche) = query.niche.as_deref() {
        let narrowed: Vec<&HistoricalDeal> = matching
            .iter()
            .copied()
            .filter(|deal| deal.niche.eq_ignore_ascii_case(niche))
            .collect();
        if !narrowed.is_empty() {
            matching = narrowed;
        }
    }

    if matching.is_empty() {
        return BenchmarkSnapshot::empty();
    }

    let count = Decimal::from(matching.len());
    let rate_total: Decimal = matching.iter().map(|deal| deal.rate).sum();
    let average_rate = (rate_total / count).round_dp(2);

    let mut prices: Vec<Decimal> = matching.iter().map(|deal| deal.final_price).collect();
    prices.sort();
    let median_price = median(&prices).map(|value| value.round_dp(2));

    let mut nearest = matching.clone();
    // sort_by_key is stable, so equal distances keep storage order.
    nearest.sort_by_key(|deal| deal.avg_views.abs_diff(query.target_views));
    nearest.truncate(query.k);

    BenchmarkSnapshot {
        count: u32::try_from(matching.len()).unwrap_or(u32::MAX),
        average_rate: Some(average_rate),
        median_price,
        min_price: prices.first().copied(),
        max_price: prices.last().copied(),
        samples: nearest.into_iter().map(HistoricalDeal::sample).collect(),
    }
}

fn median(sorted: &[Decimal]) -> Option<Decimal> {
    let len = sorted.len();
    if len == 0 {
        return None;
    }
    if len % 2 == 1 {
        Some(sorted[len / 2])
    } else {
        Some((sorted[len / 2 - 1] + sorted[len / 2]) / Decimal::from(2))
    }
}

/// Deals held in memory, in insertion order.
#[derive(Clone, Default)]
pub struct InMemoryBenchmarkSource {
    deals: Arc<RwLock<Vec<HistoricalDeal>>>,
}

impl InMemoryBenchmarkSource {
    pub fn new(deals: Vec<HistoricalDeal>) -> Self {
        Self { deals: Arc::new(RwLock::new(deals)) }
    }
}

#[async_trait]
impl BenchmarkSource for InMemoryBenchmarkSource {
    async fn lookup(&self, query: &BenchmarkQuery) -> Result<BenchmarkSnapshot, ApplicationError> {
        let deals = match self.deals.read() {
            Ok(deals) => deals,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(summarize_deals(&deals, query))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{summarize_deals, BenchmarkQuery, BenchmarkSource, InMemoryBenchmarkSource};
    use crate::domain::benchmark::HistoricalDeal;
    use crate::domain::conversation::{DeliverableType, Platform};

    fn deal(
        name: &str,
        platform: Platform,
        niche: &str,
        deliverable: DeliverableType,
        views: u64,
        price: i64,
    ) -> HistoricalDeal {
        HistoricalDeal::new(
            name,
            platform,
            niche,
            deliverable,
            1,
            views,
            Decimal::from(price),
            Utc::now(),
        )
    }

    fn fixture() -> Vec<HistoricalDeal> {
        vec![
            deal("Test1", Platform::Instagram, "fitness", DeliverableType::Reel, 100_000, 4000),
            deal("Test2", Platform::Instagram, "fitness", DeliverableType::Reel, 80_000, 3200),
            deal("Test3", Platform::TikTok, "moda", DeliverableType::Video, 150_000, 6000),
        ]
    }

    #[test]
    fn matching_deals_produce_statistics() {
        let query = BenchmarkQuery::new(Platform::Instagram, DeliverableType::Reel, 90_000);
        let snapshot = summarize_deals(&fixture(), &query);

        assert_eq!(snapshot.count, 2);
        assert_eq!(snapshot.average_rate, Some(Decimal::from(40)));
        assert_eq!(snapshot.median_price, Some(Decimal::from(3600)));
        assert_eq!(snapshot.min_price, Some(Decimal::from(3200)));
        assert_eq!(snapshot.max_price, Some(Decimal::from(4000)));
        assert_eq!(snapshot.samples.len(), 2);
    }

    #[test]
    fn empty_match_set_is_a_valid_zero_count_snapshot() {
        let query = BenchmarkQuery::new(Platform::YouTube, DeliverableType::Reel, 90_000);
        let snapshot = summarize_deals(&fixture(), &query);

        assert_eq!(snapshot.count, 0);
        assert_eq!(snapshot.average_rate, None);
        assert_eq!(snapshot.median_price, None);
        assert!(snapshot.samples.is_empty());
    }

    #[test]
    fn samples_are_sorted_by_view_proximity() {
        let query = BenchmarkQuery::new(Platform::Instagram, DeliverableType::Reel, 85_000);
        let snapshot = summarize_deals(&fixture(), &query);

        assert_eq!(snapshot.samples[0].avg_views, 80_000);
        assert_eq!(snapshot.samples[1].avg_views, 100_000);
    }

    #[test]
    fn equal_distances_keep_storage_order() {
        let deals = vec![
            deal("Later", Platform::Instagram, "fitness", DeliverableType::Reel, 110_000, 4400),
            deal("Earlier", Platform::Instagram, "fitness", DeliverableType::Reel, 90_000, 3600),
        ];
        let query = BenchmarkQuery::new(Platform::Instagram, DeliverableType::Reel, 100_000);
        let snapshot = summarize_deals(&deals, &query);

        assert_eq!(snapshot.samples[0].influencer, "Later");
        assert_eq!(snapshot.samples[1].influencer, "Earlier");
    }

    #[test]
    fn niche_filter_that_would_empty_results_is_ignored() {
        let query = BenchmarkQuery::new(Platform::Instagram, DeliverableType::Reel, 90_000)
            .with_niche(Some("culinária".to_owned()));
        let snapshot = summarize_deals(&fixture(), &query);

        assert_eq!(snapshot.count, 2);
    }

    #[test]
    fn niche_filter_narrows_when_it_matches() {
        let mut deals = fixture();
        deals.push(deal("Moda1", Platform::Instagram, "moda", DeliverableType::Reel, 95_000, 5000));
        let query = BenchmarkQuery::new(Platform::Instagram, DeliverableType::Reel, 90_000)
            .with_niche(Some(" Moda ".to_owned()));
        let snapshot = summarize_deals(&deals, &query);

        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.samples[0].influencer, "Moda1");
    }

    #[test]
    fn sample_size_caps_samples_but_not_statistics() {
        let deals: Vec<HistoricalDeal> = (1..=8)
            .map(|index| {
                deal(
                    &format!("Deal{index}"),
                    Platform::YouTube,
                    "tech",
                    DeliverableType::Video,
                    index * 10_000,
                    i64::try_from(index).unwrap_or(1) * 500,
                )
            })
            .collect();
        let query = BenchmarkQuery::new(Platform::YouTube, DeliverableType::Video, 40_000)
            .with_sample_size(3);
        let snapshot = summarize_deals(&deals, &query);

        assert_eq!(snapshot.count, 8);
        assert_eq!(snapshot.samples.len(), 3);
        assert_eq!(snapshot.samples[0].avg_views, 40_000);
    }

    #[tokio::test]
    async fn in_memory_source_never_fails_on_empty_store() {
        let source = InMemoryBenchmarkSource::default();
        let snapshot = source
            .lookup(&BenchmarkQuery::new(Platform::TikTok, DeliverableType::Story, 10_000))
            .await
            .expect("lookup");

        assert_eq!(snapshot.count, 0);
    }
}
