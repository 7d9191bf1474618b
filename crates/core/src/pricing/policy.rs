use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::benchmark::BenchmarkSnapshot;
use crate::pricing::range::PriceRange;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalReason {
    NoMarketEvidence,
    BelowFloor,
    AboveCeiling,
}

impl ApprovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoMarketEvidence => "no_market_evidence",
            Self::BelowFloor => "below_floor",
            Self::AboveCeiling => "above_ceiling",
        }
    }
}

/// Why a proposed price needs operator sign-off, or `None` when it stands on its own.
/// Missing market evidence always escalates; the range bounds are inclusive.
pub fn approval_reason(
    proposed: Decimal,
    range: &PriceRange,
    benchmark: Option<&BenchmarkSnapshot>,
) -> Option<ApprovalReason> {
    match benchmark {
        None => return Some(ApprovalReason::NoMarketEvidence),
        Some(snapshot) if !snapshot.has_evidence() => {
            return Some(ApprovalReason::NoMarketEvidence)
        }
        Some(_) => {}
    }

    if proposed < range.floor {
        Some(ApprovalReason::BelowFloor)
    } else if proposed > range.ceiling {
        Some(ApprovalReason::AboveCeiling)
    } else {
        None
    }
}

pub fn approval_required(
    proposed: Decimal,
    range: &PriceRange,
    benchmark: Option<&BenchmarkSnapshot>,
) -> bool {
    approval_reason(proposed, range, benchmark).is_some()
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{approval_reason, approval_required, ApprovalReason};
    use crate::domain::benchmark::BenchmarkSnapshot;
    use crate::pricing::range::PriceRange;

    fn range() -> PriceRange {
        PriceRange {
            floor: Decimal::from(3000),
            target: Decimal::from(5000),
            ceiling: Decimal::from(7000),
        }
    }

    fn evidence() -> BenchmarkSnapshot {
        BenchmarkSnapshot { count: 5, ..BenchmarkSnapshot::default() }
    }

    #[test]
    fn no_benchmark_always_requires_approval() {
        assert!(approval_required(Decimal::from(5000), &range(), None));
        assert!(approval_required(
            Decimal::from(5000),
            &range(),
            Some(&BenchmarkSnapshot::empty())
        ));
    }

    #[test]
    fn boundaries_are_inclusive() {
        assert!(!approval_required(Decimal::from(3000), &range(), Some(&evidence())));
        assert!(!approval_required(Decimal::from(7000), &range(), Some(&evidence())));
    }

    #[test]
    fn outside_the_range_requires_approval() {
        assert_eq!(
            approval_reason(Decimal::new(299_999, 2), &range(), Some(&evidence())),
            Some(ApprovalReason::BelowFloor)
        );
        assert_eq!(
            approval_reason(Decimal::new(700_001, 2), &range(), Some(&evidence())),
            Some(ApprovalReason::AboveCeiling)
        );
    }

    #[test]
    fn inside_the_range_with_evidence_passes() {
        assert!(!approval_required(Decimal::from(5500), &range(), Some(&evidence())));
    }
}
