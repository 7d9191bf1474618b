use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::conversation::ThreadId;
use crate::domain::money::{format_brl, parse_brl};
use crate::pricing::PriceRange;

/// Surfaced to the operator when a thread suspends at the approval gate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub thread_id: ThreadId,
    pub proposed_price: Option<Decimal>,
    pub price_range: Option<PriceRange>,
    pub prompt: String,
    pub requested_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn new(
        thread_id: ThreadId,
        proposed_price: Option<Decimal>,
        price_range: Option<PriceRange>,
    ) -> Self {
        let prompt = match (proposed_price, &price_range) {
            (Some(price), Some(range)) => format!(
                "Proposta de {} fora da faixa {}-{}. Aprovar? (sim / não / valor para contraproposta)",
                format_brl(price),
                format_brl(range.floor),
                format_brl(range.ceiling)
            ),
            (Some(price), None) => format!(
                "Proposta de {} sem faixa calculada. Aprovar? (sim / não / valor para contraproposta)",
                format_brl(price)
            ),
            (None, _) => "Sem dados de mercado para esta negociação. Aprovar? (sim / não / valor para contraproposta)"
                .to_owned(),
        };
        Self { thread_id, proposed_price, price_range, prompt, requested_at: Utc::now() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalOutcome {
    Approved,
    Rejected,
    CounterOffer,
}

impl ApprovalOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::CounterOffer => "counter_offer",
        }
    }
}

/// Operator reply to an [`ApprovalRequest`]. A counter offer takes precedence over `approved`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub counter_offer: Option<Decimal>,
}

impl ApprovalDecision {
    pub fn approve() -> Self {
        Self { approved: true, counter_offer: None }
    }

    pub fn reject() -> Self {
        Self { approved: false, counter_offer: None }
    }

    pub fn counter(amount: Decimal) -> Self {
        Self { approved: false, counter_offer: Some(amount) }
    }

    /// Reads free-form operator input: a positive amount is a counter offer, an affirmative
    /// word approves, anything else rejects.
    pub fn from_operator_input(input: &str) -> Self {
        let trimmed = input.trim().to_lowercase();
        if let Some(amount) = parse_brl(&trimmed).filter(|amount| *amount > Decimal::ZERO) {
            return Self::counter(amount);
        }
        match trimmed.as_str() {
            "sim" | "s" | "yes" | "y" | "aprovar" | "aprovado" | "ok" => Self::approve(),
            _ => Self::reject(),
        }
    }

    pub fn outcome(&self) -> ApprovalOutcome {
        match (self.counter_offer, self.approved) {
            (Some(_), _) => ApprovalOutcome::CounterOffer,
            (None, true) => ApprovalOutcome::Approved,
            (None, false) => ApprovalOutcome::Rejected,
        }
    }

    /// Transcript note recorded when the decision is applied.
    pub fn operator_note(&self) -> String {
        match self.counter_offer {
            Some(amount) => format!("Operador ajustou a proposta para {}", format_brl(amount)),
            None if self.approved => "Proposta aprovada pelo operador.".to_owned(),
            None => "Proposta recusada pelo operador. Renegociando...".to_owned(),
        }
    }
}
