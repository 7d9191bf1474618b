use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::conversation::{ConversationState, DeliverableType, Platform, ThreadId};
use crate::pricing::PriceRange;

/// A price range offered during a conversation, recorded for later review.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferRecord {
    pub floor: Decimal,
    pub target: Decimal,
    pub ceiling: Decimal,
    pub proposed: Option<Decimal>,
    pub accepted: Option<bool>,
}

impl OfferRecord {
    pub fn from_range(range: &PriceRange, proposed: Option<Decimal>) -> Self {
        Self {
            floor: range.floor,
            target: range.target,
            ceiling: range.ceiling,
            proposed,
            accepted: None,
        }
    }

    pub fn with_acceptance(mut self, accepted: bool) -> Self {
        self.accepted = Some(accepted);
        self
    }
}

/// Closing summary emitted by the close stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealSummary {
    pub thread_id: ThreadId,
    pub platform: Option<Platform>,
    pub deliverable_type: Option<DeliverableType>,
    pub niche: Option<String>,
    pub quantity: Option<u32>,
    pub avg_views: Option<u64>,
    pub deadline: Option<String>,
    pub final_price: Option<Decimal>,
    pub price_range: Option<PriceRange>,
    pub status: String,
}

impl DealSummary {
    pub fn from_state(state: &ConversationState) -> Self {
        let fields = &state.qualification;
        Self {
            thread_id: state.thread_id.clone(),
            platform: fields.platform,
            deliverable_type: fields.deliverable_type,
            niche: fields.niche.clone(),
            quantity: fields.quantity,
            avg_views: fields.avg_views,
            deadline: fields.deadline.clone(),
            final_price: state.proposed_price,
            price_range: state.price_range.clone(),
            status: "closed".to_owned(),
        }
    }

    pub fn to_message(&self) -> String {
        let body = serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_owned());
        format!("Negociação finalizada!\n\nResumo: {body}")
    }
}
