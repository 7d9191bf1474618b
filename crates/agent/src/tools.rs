use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use negotiator_core::domain::benchmark::BenchmarkSnapshot;
use negotiator_core::domain::conversation::{DeliverableType, Platform};
use negotiator_core::pricing::{
    approval_reason, compute_range, BenchmarkQuery, BenchmarkSource, PriceRange,
    DEFAULT_SAMPLE_SIZE,
};

use crate::llm::ToolDescriptor;

const MAX_SAMPLES: usize = 20;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn descriptor(&self) -> ToolDescriptor;
    async fn execute(&self, input: Value) -> Result<Value>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    /// The tools offered to the model while negotiating.
    pub fn negotiation(benchmarks: Arc<dyn BenchmarkSource>) -> Self {
        let mut registry = Self::default();
        registry.register(RetrieveBenchmarksTool::new(benchmarks));
        registry.register(CalculatePriceRangeTool);
        registry.register(CheckApprovalRequiredTool);
        registry
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Descriptors sorted by name.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> =
            self.tools.values().map(|tool| tool.descriptor()).collect();
        descriptors.sort_by(|left, right| left.name.cmp(&right.name));
        descriptors
    }

    /// Runs a tool by name. Unknown tools and tool failures come back as `{"error": ...}`
    /// so the model can read them.
    pub async fn dispatch(&self, name: &str, input: Value) -> Value {
        let Some(tool) = self.tools.get(name) else {
            return json!({ "error": format!("Unknown tool: {name}") });
        };
        match tool.execute(input).await {
            Ok(output) => output,
            Err(error) => {
                warn!(event_name = "tool.failed", tool = name, error = %error, "tool call failed");
                json!({ "error": error.to_string() })
            }
        }
    }
}

pub struct RetrieveBenchmarksTool {
    source: Arc<dyn BenchmarkSource>,
}

impl RetrieveBenchmarksTool {
    pub fn new(source: Arc<dyn BenchmarkSource>) -> Self {
        Self { source }
    }
}

#[derive(Debug, Deserialize)]
struct RetrieveBenchmarksArgs {
    platform: String,
    deliverable_type: String,
    avg_views: u64,
    #[serde(default)]
    niche: Option<String>,
    #[serde(default)]
    k: Option<usize>,
}

#[async_trait]
impl Tool for RetrieveBenchmarksTool {
    fn name(&self) -> &'static str {
        "retrieve_benchmarks"
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_owned(),
            description: "Busca deals históricos similares para embasar a negociação. Retorna \
                          contagem, taxa média por mil views, preço mediano, mínimo, máximo e \
                          amostras."
                .to_owned(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "platform": {"type": "string", "enum": ["instagram", "tiktok", "youtube"]},
                    "niche": {"type": "string"},
                    "deliverable_type": {"type": "string", "enum": ["reel", "post", "story", "video"]},
                    "avg_views": {"type": "integer"},
                    "k": {"type": "integer", "description": "Número de amostras (padrão 5)"}
                },
                "required": ["platform", "deliverable_type", "avg_views"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let args: RetrieveBenchmarksArgs =
            serde_json::from_value(input).context("invalid retrieve_benchmarks arguments")?;
        let platform = Platform::from_str(&args.platform).map_err(|error| anyhow!(error))?;
        let deliverable =
            DeliverableType::from_str(&args.deliverable_type).map_err(|error| anyhow!(error))?;

        let query = BenchmarkQuery::new(platform, deliverable, args.avg_views)
            .with_niche(args.niche)
            .with_sample_size(args.k.unwrap_or(DEFAULT_SAMPLE_SIZE).clamp(1, MAX_SAMPLES));
        let snapshot = self.source.lookup(&query).await.map_err(|error| anyhow!(error))?;

        Ok(serde_json::to_value(snapshot)?)
    }
}

pub struct CalculatePriceRangeTool;

#[derive(Debug, Deserialize)]
struct CalculatePriceRangeArgs {
    avg_views: u64,
    qty: u32,
    target_cpm_brl: Decimal,
    #[serde(default)]
    benchmarks: Option<Value>,
}

#[async_trait]
impl Tool for CalculatePriceRangeTool {
    fn name(&self) -> &'static str {
        "calculate_price_range"
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_owned(),
            description: "Calcula a faixa de preço (floor/target/ceiling) a partir de views, \
                          quantidade, taxa alvo por mil views e benchmarks."
                .to_owned(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "avg_views": {"type": "integer"},
                    "qty": {"type": "integer"},
                    "target_cpm_brl": {"type": "number"},
                    "benchmarks": {"type": "object", "description": "Resultado de retrieve_benchmarks"}
                },
                "required": ["avg_views", "qty", "target_cpm_brl"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let args: CalculatePriceRangeArgs =
            serde_json::from_value(input).context("invalid calculate_price_range arguments")?;
        let benchmark = args.benchmarks.as_ref().map(benchmark_from_value);
        let range = compute_range(args.avg_views, args.qty, args.target_cpm_brl, benchmark.as_ref());
        Ok(serde_json::to_value(range)?)
    }
}

pub struct CheckApprovalRequiredTool;

#[derive(Debug, Deserialize)]
struct CheckApprovalArgs {
    proposed_brl: Decimal,
    price_range: Value,
    #[serde(default)]
    benchmarks: Option<Value>,
}

#[async_trait]
impl Tool for CheckApprovalRequiredTool {
    fn name(&self) -> &'static str {
        "check_approval_required"
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_owned(),
            description: "Verifica se a proposta precisa de aprovação humana: fora da faixa ou \
                          sem benchmarks."
                .to_owned(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "proposed_brl": {"type": "number"},
                    "price_range": {
                        "type": "object",
                        "properties": {
                            "floor": {"type": "number"},
                            "target": {"type": "number"},
                            "ceiling": {"type": "number"}
                        }
                    },
                    "benchmarks": {"type": "object"}
                },
                "required": ["proposed_brl", "price_range"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let args: CheckApprovalArgs =
            serde_json::from_value(input).context("invalid check_approval_required arguments")?;
        let range = range_from_value(&args.price_range)
            .ok_or_else(|| anyhow!("price_range needs floor, target and ceiling"))?;
        let benchmark = args.benchmarks.as_ref().map(benchmark_from_value);
        let reason = approval_reason(args.proposed_brl, &range, benchmark.as_ref());

        Ok(json!({
            "approval_required": reason.is_some(),
            "reason": reason.map(|reason| reason.as_str()),
        }))
    }
}

/// Reads only the statistics pricing uses, accepting `avg_cpm` as an alias for the rate.
fn benchmark_from_value(value: &Value) -> BenchmarkSnapshot {
    let count = value
        .get("count")
        .and_then(Value::as_u64)
        .and_then(|count| u32::try_from(count).ok())
        .unwrap_or(0);
    let average_rate = value
        .get("average_rate")
        .or_else(|| value.get("avg_cpm"))
        .and_then(decimal_from_value);
    BenchmarkSnapshot { count, average_rate, ..BenchmarkSnapshot::empty() }
}

fn range_from_value(value: &Value) -> Option<PriceRange> {
    Some(PriceRange {
        floor: value.get("floor").and_then(decimal_from_value)?,
        target: value.get("target").and_then(decimal_from_value)?,
        ceiling: value.get("ceiling").and_then(decimal_from_value)?,
    })
}

fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(number) => Decimal::from_str(&number.to_string()).ok(),
        Value::String(text) => Decimal::from_str(text.trim()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal::Decimal;
    use serde_json::json;

    use negotiator_core::domain::benchmark::HistoricalDeal;
    use negotiator_core::domain::conversation::{DeliverableType, Platform};
    use negotiator_core::pricing::InMemoryBenchmarkSource;

    use super::ToolRegistry;

    fn registry() -> ToolRegistry {
        let deals = vec![
            HistoricalDeal::new(
                "Ana Fitness",
                Platform::Instagram,
                "fitness",
                DeliverableType::Reel,
                1,
                80_000,
                Decimal::from(3200),
                Utc::now(),
            ),
            HistoricalDeal::new(
                "Lara Chef",
                Platform::Instagram,
                "culinaria",
                DeliverableType::Reel,
                1,
                70_000,
                Decimal::from(2800),
                Utc::now(),
            ),
        ];
        ToolRegistry::negotiation(Arc::new(InMemoryBenchmarkSource::new(deals)))
    }

    #[test]
    fn negotiation_registry_describes_three_tools() {
        let registry = registry();
        let names: Vec<String> =
            registry.descriptors().into_iter().map(|descriptor| descriptor.name).collect();

        assert_eq!(registry.len(), 3);
        assert_eq!(
            names,
            vec!["calculate_price_range", "check_approval_required", "retrieve_benchmarks"]
        );
    }

    #[tokio::test]
    async fn retrieve_benchmarks_returns_statistics() {
        let output = registry()
            .dispatch(
                "retrieve_benchmarks",
                json!({"platform": "instagram", "deliverable_type": "reel", "avg_views": 75000, "k": 1}),
            )
            .await;

        assert_eq!(output["count"], json!(2));
        assert_eq!(output["samples"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn calculate_price_range_lifts_rate_from_benchmarks() {
        let output = registry()
            .dispatch(
                "calculate_price_range",
                json!({
                    "avg_views": 100000,
                    "qty": 1,
                    "target_cpm_brl": 40,
                    "benchmarks": {"count": 5, "avg_cpm": 50}
                }),
            )
            .await;

        let floor: Decimal = serde_json::from_value(output["floor"].clone()).expect("floor");
        let ceiling: Decimal = serde_json::from_value(output["ceiling"].clone()).expect("ceiling");
        assert_eq!(floor, Decimal::from(3500));
        assert_eq!(ceiling, Decimal::from(6500));
    }

    #[tokio::test]
    async fn check_approval_escalates_without_evidence() {
        let registry = registry();
        let range = json!({"floor": 3000, "target": 5000, "ceiling": 7000});

        let inside = registry
            .dispatch(
                "check_approval_required",
                json!({"proposed_brl": 3000, "price_range": range, "benchmarks": {"count": 5}}),
            )
            .await;
        assert_eq!(inside["approval_required"], json!(false));

        let no_evidence = registry
            .dispatch("check_approval_required", json!({"proposed_brl": 4000, "price_range": range}))
            .await;
        assert_eq!(no_evidence["approval_required"], json!(true));
        assert_eq!(no_evidence["reason"], json!("no_market_evidence"));
    }

    #[tokio::test]
    async fn unknown_tools_and_bad_arguments_become_errors() {
        let registry = registry();

        let unknown = registry.dispatch("book_flight", json!({})).await;
        assert_eq!(unknown["error"], json!("Unknown tool: book_flight"));

        let invalid = registry.dispatch("retrieve_benchmarks", json!({"platform": "orkut"})).await;
        assert!(invalid["error"].is_string());
    }
}
