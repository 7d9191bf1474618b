use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::benchmark::BenchmarkSnapshot;

/// Floor sits at 70% of target.
pub const FLOOR_RATIO: Decimal = Decimal::from_parts(70, 0, 0, false, 2);
/// Ceiling sits at 130% of target.
pub const CEILING_RATIO: Decimal = Decimal::from_parts(130, 0, 0, false, 2);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRange {
    pub floor: Decimal,
    pub target: Decimal,
    pub ceiling: Decimal,
}

impl PriceRange {
    pub fn contains(&self, price: Decimal) -> bool {
        price >= self.floor && price <= self.ceiling
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    Target,
    Benchmark,
}

impl RateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Target => "target",
            Self::Benchmark => "benchmark",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceComputation {
    pub range: PriceRange,
    pub effective_rate: Decimal,
    pub rate_source: RateSource,
}

/// The benchmark rate only ever raises the effective rate.
pub fn effective_rate(
    target_rate: Decimal,
    benchmark: Option<&BenchmarkSnapshot>,
) -> (Decimal, RateSource) {
    match benchmark.and_then(|snapshot| snapshot.average_rate) {
        Some(market_rate) if market_rate > target_rate => (market_rate, RateSource::Benchmark),
        _ => (target_rate, RateSource::Target),
    }
}

pub fn compute_range_with_trace(
    avg_views: u64,
    quantity: u32,
    target_rate: Decimal,
    benchmark: Option<&BenchmarkSnapshot>,
) -> PriceComputation {
    let (rate, rate_source) = effective_rate(target_rate, benchmark);
    let base = Decimal::from(avg_views) * Decimal::from(quantity) * rate / Decimal::from(1000);

    PriceComputation {
        range: PriceRange {
            floor: (base * FLOOR_RATIO).round_dp(2),
            target: base.round_dp(2),
            ceiling: (base * CEILING_RATIO).round_dp(2),
        },
        effective_rate: rate,
        rate_source,
    }
}

pub fn compute_range(
    avg_views: u64,
    quantity: u32,
    target_rate: Decimal,
    benchmark: Option<&BenchmarkSnapshot>,
) -> PriceRange {
    compute_range_with_trace(avg_views, quantity, target_rate, benchmark).range
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{compute_range, compute_range_with_trace, RateSource};
    use crate::domain::benchmark::BenchmarkSnapshot;

    fn benchmark(average_rate: Option<i64>, count: u32) -> BenchmarkSnapshot {
        BenchmarkSnapshot {
            count,
            average_rate: average_rate.map(Decimal::from),
            ..BenchmarkSnapshot::default()
        }
    }

    #[test]
    fn range_without_benchmark_uses_target_rate() {
        let range = compute_range(100_000, 1, Decimal::from(40), None);

        assert_eq!(range.floor, Decimal::from(2800));
        assert_eq!(range.target, Decimal::from(4000));
        assert_eq!(range.ceiling, Decimal::from(5200));
    }

    #[test]
    fn higher_benchmark_rate_wins() {
        let snapshot = benchmark(Some(50), 5);
        let computation =
            compute_range_with_trace(100_000, 1, Decimal::from(40), Some(&snapshot));

        assert_eq!(computation.range.floor, Decimal::from(3500));
        assert_eq!(computation.range.target, Decimal::from(5000));
        assert_eq!(computation.range.ceiling, Decimal::from(6500));
        assert_eq!(computation.rate_source, RateSource::Benchmark);
    }

    #[test]
    fn lower_or_absent_benchmark_rate_keeps_target() {
        let lower = benchmark(Some(30), 5);
        let absent = benchmark(None, 0);

        for snapshot in [&lower, &absent] {
            let computation =
                compute_range_with_trace(100_000, 1, Decimal::from(40), Some(snapshot));
            assert_eq!(computation.range.target, Decimal::from(4000));
            assert_eq!(computation.rate_source, RateSource::Target);
        }
    }

    #[test]
    fn quantity_scales_linearly() {
        let range = compute_range(50_000, 3, Decimal::from(40), None);
        assert_eq!(range.target, Decimal::from(6000));
    }

    #[test]
    fn floor_and_ceiling_ratios_hold_across_inputs() {
        let rates = [Decimal::new(3333, 2), Decimal::from(40), Decimal::new(7777, 2)];
        for views in [1_234_u64, 85_000, 1_000_000] {
            for quantity in [1_u32, 2, 7] {
                for rate in rates {
                    let range = compute_range(views, quantity, rate, None);
                    let target = range.target;
                    let cent = Decimal::new(1, 2);

                    assert!((range.floor - target * Decimal::new(70, 2)).abs() <= cent);
                    assert!((range.ceiling - target * Decimal::new(130, 2)).abs() <= cent);
                    assert!(range.floor < target && target < range.ceiling);
                }
            }
        }
    }

    #[test]
    fn values_are_rounded_to_cents() {
        let range = compute_range(12_345, 1, Decimal::new(3333, 2), None);
        assert!(range.floor.scale() <= 2);
        assert!(range.target.scale() <= 2);
        assert!(range.ceiling.scale() <= 2);
    }
}
