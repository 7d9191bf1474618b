use serde_json::{json, Map, Value};

use negotiator_core::domain::agent::AgentProfile;
use negotiator_core::domain::conversation::{
    ConversationState, QualificationField, QualificationFields,
};

use crate::llm::ToolDescriptor;

pub const EXTRACT_INFO_TOOL: &str = "extract_info";

const NEGOTIATOR_RULES: &str = "\
Você é um negociador profissional de uma agência de marketing de influenciadores.
Seu objetivo é fechar o melhor negócio para a agência: o MENOR preço que o influenciador aceitar.

Regras:
- NUNCA revele a faixa de preço interna nem use os termos floor, target, ceiling ou faixa de preço.
- Comece propondo um valor próximo do mínimo aceitável.
- Justifique propostas com dados de mercado (\"deals parecidos fecham por volta de R$X\").
- Se o influenciador pedir mais, suba aos poucos, no máximo 10-15% por rodada.
- Só ultrapasse o valor máximo com aprovação do operador.
- Se o influenciador pedir para falar com um humano, respeite imediatamente.
- Nunca colete dados sensíveis (CPF, cartão de crédito, senhas).
- Responda sempre em português brasileiro, de forma cordial e concisa.";

const EXTRACTION_INSTRUCTIONS: &str =
    "Você é um extrator de dados. Extraia informações estruturadas usando a ferramenta disponível.";

/// System instructions for turns the counterpart reads, with the internal context attached.
pub fn negotiator_instructions(profile: &AgentProfile, state: &ConversationState) -> String {
    let mut instructions = String::from(NEGOTIATOR_RULES);
    if !profile.persona.trim().is_empty() {
        instructions.push_str("\n\nPersona: ");
        instructions.push_str(profile.persona.trim());
    }
    let context = internal_context(state);
    if !context.is_empty() {
        instructions.push_str("\n\n");
        instructions.push_str(&context);
    }
    instructions
}

/// Figures the model may use but must not repeat. Bounds are labelled so they are not
/// mistaken for offers.
pub fn internal_context(state: &ConversationState) -> String {
    let mut parts = Vec::new();

    if let Some(range) = &state.price_range {
        parts.push(format!(
            "[DADOS INTERNOS - NUNCA revelar estes valores ao influenciador]\n  \
             Valor mínimo aceitável (comece aqui): R${:.2}\n  \
             Valor ideal para a agência: R${:.2}\n  \
             Valor máximo (precisa de aprovação acima): R${:.2}",
            range.floor, range.target, range.ceiling
        ));
    }
    if let Some(snapshot) = state.benchmark.as_ref().filter(|snapshot| snapshot.has_evidence()) {
        let mut market = format!(
            "[DADOS DE MERCADO - pode usar para justificar propostas]\n  {} deals similares encontrados",
            snapshot.count
        );
        if let Some(rate) = snapshot.average_rate {
            market.push_str(&format!("\n  Valor médio por mil views: R${rate:.2}"));
        }
        if let Some(median) = snapshot.median_price {
            market.push_str(&format!("\n  Preço mediano: R${median:.2}"));
        }
        parts.push(market);
    }
    if let Some(price) = state.proposed_price {
        parts.push(format!("[PROPOSTA ATUAL]: R${price:.2}"));
    }
    let known = known_fields(&state.qualification);
    if known.as_object().is_some_and(|fields| !fields.is_empty()) {
        parts.push(format!("Dados coletados do influenciador: {known}"));
    }

    parts.join("\n")
}

pub fn extraction_instructions() -> &'static str {
    EXTRACTION_INSTRUCTIONS
}

pub fn extraction_prompt(message: &str, known: &QualificationFields) -> String {
    let known = known_fields(known);
    let known = if known.as_object().is_some_and(Map::is_empty) {
        "nenhum".to_owned()
    } else {
        known.to_string()
    };
    format!(
        "Mensagem do influenciador: '{message}'\n\n\
         Dados já coletados: {known}\n\n\
         Extraia TODAS as informações presentes na mensagem usando a ferramenta extract_info. \
         Converta valores como '100k' para 100000. \
         Se o influenciador menciona 'reels', o deliverable_type é 'reel' e a platform é 'instagram'. \
         Se menciona 'stories', o deliverable_type é 'story'."
    )
}

pub fn clarification_prompt(state: &ConversationState, missing: &[QualificationField]) -> String {
    let missing: Vec<&str> = missing.iter().map(QualificationField::label).collect();
    format!(
        "O influenciador disse: '{}'\n\n\
         Dados já confirmados: {}\n\
         Campos ainda faltando: {}.\n\n\
         Confirme brevemente o que já foi coletado e pergunte APENAS o que falta.",
        state.last_user_message,
        known_fields(&state.qualification),
        missing.join(", ")
    )
}

pub fn extract_info_descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: EXTRACT_INFO_TOOL.to_owned(),
        description: "Extrai informações estruturadas da mensagem do influenciador. Chame sempre \
                      que a mensagem contiver qualquer uma delas, mesmo parcialmente."
            .to_owned(),
        parameters: json!({
            "type": "object",
            "properties": {
                "platform": {"type": "string", "enum": ["instagram", "tiktok", "youtube"]},
                "deliverable_type": {"type": "string", "enum": ["reel", "post", "story", "video"]},
                "avg_views": {
                    "type": "integer",
                    "description": "Média de visualizações por conteúdo. '100k' vira 100000."
                },
                "qty": {"type": "integer", "description": "Quantidade de peças"},
                "deadline": {"type": "string", "description": "Prazo de entrega mencionado"},
                "niche": {"type": "string", "description": "Nicho do influenciador"},
                "proposed_price_brl": {
                    "type": "number",
                    "description": "Preço proposto pelo influenciador em reais, se mencionado."
                }
            },
            "required": [],
            "additionalProperties": false
        }),
    }
}

fn known_fields(fields: &QualificationFields) -> Value {
    let mut known = Map::new();
    if let Some(platform) = fields.platform {
        known.insert("platform".to_owned(), Value::from(platform.as_str()));
    }
    if let Some(deliverable) = fields.deliverable_type {
        known.insert("deliverable_type".to_owned(), Value::from(deliverable.as_str()));
    }
    if let Some(views) = fields.avg_views {
        known.insert("avg_views".to_owned(), Value::from(views));
    }
    if let Some(quantity) = fields.quantity {
        known.insert("qty".to_owned(), Value::from(quantity));
    }
    if let Some(deadline) = &fields.deadline {
        known.insert("deadline".to_owned(), Value::from(deadline.as_str()));
    }
    if let Some(niche) = &fields.niche {
        known.insert("niche".to_owned(), Value::from(niche.as_str()));
    }
    Value::Object(known)
}
