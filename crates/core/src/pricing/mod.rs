pub mod benchmark;
pub mod policy;
pub mod range;

use rust_decimal::Decimal;

use crate::domain::benchmark::BenchmarkSnapshot;

pub use self::benchmark::{
    summarize_deals, BenchmarkQuery, BenchmarkSource, InMemoryBenchmarkSource,
    DEFAULT_SAMPLE_SIZE,
};
pub use self::policy::{approval_reason, approval_required, ApprovalReason};
pub use self::range::{
    compute_range, compute_range_with_trace, effective_rate, PriceComputation, PriceRange,
    RateSource, CEILING_RATIO, FLOOR_RATIO,
};

pub trait PriceEngine: Send + Sync {
    fn compute(
        &self,
        avg_views: u64,
        quantity: u32,
        target_rate: Decimal,
        benchmark: Option<&BenchmarkSnapshot>,
    ) -> PriceComputation;
}

pub trait ApprovalPolicy: Send + Sync {
    fn evaluate(
        &self,
        proposed: Decimal,
        range: &PriceRange,
        benchmark: Option<&BenchmarkSnapshot>,
    ) -> Option<ApprovalReason>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DeterministicPriceEngine;

impl PriceEngine for DeterministicPriceEngine {
    fn compute(
        &self,
        avg_views: u64,
        quantity: u32,
        target_rate: Decimal,
        benchmark: Option<&BenchmarkSnapshot>,
    ) -> PriceComputation {
        compute_range_with_trace(avg_views, quantity, target_rate, benchmark)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DeterministicApprovalPolicy;

impl ApprovalPolicy for DeterministicApprovalPolicy {
    fn evaluate(
        &self,
        proposed: Decimal,
        range: &PriceRange,
        benchmark: Option<&BenchmarkSnapshot>,
    ) -> Option<ApprovalReason> {
        approval_reason(proposed, range, benchmark)
    }
}

/// Price engine and approval policy used by the state machine.
pub struct PricingRuntime {
    price_engine: Box<dyn PriceEngine>,
    approval_policy: Box<dyn ApprovalPolicy>,
}

impl PricingRuntime {
    pub fn new(
        price_engine: impl PriceEngine + 'static,
        approval_policy: impl ApprovalPolicy + 'static,
    ) -> Self {
        Self { price_engine: Box::new(price_engine), approval_policy: Box::new(approval_policy) }
    }

    pub fn price(
        &self,
        avg_views: u64,
        quantity: u32,
        target_rate: Decimal,
        benchmark: Option<&BenchmarkSnapshot>,
    ) -> PriceComputation {
        self.price_engine.compute(avg_views, quantity, target_rate, benchmark)
    }

    pub fn approval_reason(
        &self,
        proposed: Decimal,
        range: &PriceRange,
        benchmark: Option<&BenchmarkSnapshot>,
    ) -> Option<ApprovalReason> {
        self.approval_policy.evaluate(proposed, range, benchmark)
    }
}

impl Default for PricingRuntime {
    fn default() -> Self {
        Self::new(DeterministicPriceEngine, DeterministicApprovalPolicy)
    }
}
