//! Network-free backend: keyword extraction plus fixed Portuguese templates.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use negotiator_core::domain::money::format_brl;

use crate::conversation::{to_extract_info, KeywordExtractor};
use crate::llm::{Generation, LlmClient, LlmRequest, RequestPurpose, ToolCall};
use crate::prompts::EXTRACT_INFO_TOOL;

#[derive(Clone, Debug, Default)]
pub struct OfflineClient {
    extractor: KeywordExtractor,
}

impl OfflineClient {
    pub fn new() -> Self {
        Self { extractor: KeywordExtractor::new() }
    }
}

#[async_trait]
impl LlmClient for OfflineClient {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn generate(&self, request: &LlmRequest) -> Result<Generation> {
        let generation = match &request.purpose {
            RequestPurpose::Extraction { message } => Generation::ToolCalls {
                calls: vec![ToolCall {
                    id: "offline-extract".to_owned(),
                    name: EXTRACT_INFO_TOOL.to_owned(),
                    arguments: to_extract_info(&self.extractor.extract(message)),
                }],
                text: None,
            },
            RequestPurpose::Clarification { missing } => Generation::Text(clarification(missing)),
            RequestPurpose::Negotiation { opening_offer, counterpart_offer } => {
                Generation::Text(negotiation(*opening_offer, *counterpart_offer))
            }
        };
        Ok(generation)
    }
}

fn clarification(missing: &[String]) -> String {
    match missing {
        [] => "Obrigado! Já tenho todas as informações de que preciso.".to_owned(),
        [only] => format!("Obrigado pelas informações! Só falta me dizer: {only}."),
        [init @ .., last] => format!(
            "Obrigado pelas informações! Para montar uma proposta, preciso saber: {} e {last}.",
            init.join(", ")
        ),
    }
}

fn negotiation(opening_offer: Option<Decimal>, counterpart_offer: Option<Decimal>) -> String {
    match (opening_offer, counterpart_offer) {
        (Some(offer), Some(counterpart)) if counterpart <= offer => format!(
            "Perfeito! Podemos fechar em {}. Vou preparar os próximos passos.",
            format_brl(counterpart)
        ),
        (Some(offer), Some(counterpart)) => format!(
            "Entendo sua proposta de {}. Deals parecidos no mercado fecham por menos, então \
             consigo oferecer {}. Podemos seguir assim?",
            format_brl(counterpart),
            format_brl(offer)
        ),
        (Some(offer), None) => format!(
            "Com base em parcerias parecidas no mercado, podemos oferecer {} por esse pacote. \
             O que acha?",
            format_brl(offer)
        ),
        (None, Some(counterpart)) => format!(
            "Recebi sua proposta de {}. Vou analisar com a equipe e retorno em seguida.",
            format_brl(counterpart)
        ),
        (None, None) => "Vamos conversar sobre valores. Qual seria a sua proposta?".to_owned(),
    }
}
