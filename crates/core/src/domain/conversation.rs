use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::benchmark::BenchmarkSnapshot;
use crate::flows::Stage;
use crate::pricing::PriceRange;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self { kind, value: value.to_owned() }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Owner {
    #[default]
    Agent,
    Human,
}

impl Owner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Human => "human",
        }
    }
}

impl FromStr for Owner {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "agent" => Ok(Self::Agent),
            "human" => Ok(Self::Human),
            _ => Err(UnknownVariant::new("owner", value)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    #[default]
    Active,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

impl FromStr for ConversationStatus {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "closed" => Ok(Self::Closed),
            _ => Err(UnknownVariant::new("conversation status", value)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl FromStr for MessageRole {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(UnknownVariant::new("message role", value)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), created_at: Utc::now() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    TikTok,
    YouTube,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Self::Instagram, Self::TikTok, Self::YouTube];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instagram => "instagram",
            Self::TikTok => "tiktok",
            Self::YouTube => "youtube",
        }
    }
}

impl FromStr for Platform {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "instagram" | "insta" | "ig" => Ok(Self::Instagram),
            "tiktok" | "tik tok" => Ok(Self::TikTok),
            "youtube" | "yt" => Ok(Self::YouTube),
            _ => Err(UnknownVariant::new("platform", value)),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliverableType {
    Reel,
    Post,
    Story,
    Video,
}

impl DeliverableType {
    pub const ALL: [DeliverableType; 4] = [Self::Reel, Self::Post, Self::Story, Self::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reel => "reel",
            Self::Post => "post",
            Self::Story => "story",
            Self::Video => "video",
        }
    }
}

impl FromStr for DeliverableType {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "reel" | "reels" => Ok(Self::Reel),
            "post" | "posts" => Ok(Self::Post),
            "story" | "stories" | "storie" => Ok(Self::Story),
            "video" | "videos" | "vídeo" | "vídeos" => Ok(Self::Video),
            _ => Err(UnknownVariant::new("deliverable type", value)),
        }
    }
}

impl fmt::Display for DeliverableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five fields that must be known before a deal can be priced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualificationField {
    Platform,
    DeliverableType,
    AvgViews,
    Quantity,
    Deadline,
}

impl QualificationField {
    pub const REQUIRED: [QualificationField; 5] = [
        Self::Platform,
        Self::DeliverableType,
        Self::AvgViews,
        Self::Quantity,
        Self::Deadline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Platform => "platform",
            Self::DeliverableType => "deliverable_type",
            Self::AvgViews => "avg_views",
            Self::Quantity => "quantity",
            Self::Deadline => "deadline",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Platform => "plataforma",
            Self::DeliverableType => "tipo de entrega",
            Self::AvgViews => "média de visualizações",
            Self::Quantity => "quantidade",
            Self::Deadline => "prazo",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualificationFields {
    pub platform: Option<Platform>,
    pub deliverable_type: Option<DeliverableType>,
    pub niche: Option<String>,
    pub quantity: Option<u32>,
    pub avg_views: Option<u64>,
    pub deadline: Option<String>,
}

impl QualificationFields {
    pub fn is_set(&self, field: QualificationField) -> bool {
        match field {
            QualificationField::Platform => self.platform.is_some(),
            QualificationField::DeliverableType => self.deliverable_type.is_some(),
            QualificationField::AvgViews => self.avg_views.is_some(),
            QualificationField::Quantity => self.quantity.is_some(),
            QualificationField::Deadline => self.deadline.is_some(),
        }
    }

    pub fn missing(&self) -> Vec<QualificationField> {
        QualificationField::REQUIRED.into_iter().filter(|field| !self.is_set(*field)).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}

/// Values pulled from one inbound message. Every field is optional; an empty extraction is
/// a valid result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub platform: Option<Platform>,
    pub deliverable_type: Option<DeliverableType>,
    pub avg_views: Option<u64>,
    pub quantity: Option<u32>,
    pub deadline: Option<String>,
    pub niche: Option<String>,
    pub proposed_price: Option<Decimal>,
}

impl ExtractedFields {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub thread_id: ThreadId,
    pub influencer_phone: String,
    pub agent_id: String,
    pub qualification: QualificationFields,
    pub target_rate: Decimal,
    pub price_range: Option<PriceRange>,
    pub benchmark: Option<BenchmarkSnapshot>,
    pub approval_required: bool,
    pub proposed_price: Option<Decimal>,
    /// Last price the operator approved or set as a counter offer.
    pub reviewed_price: Option<Decimal>,
    pub last_user_message: String,
    pub current_stage: Option<Stage>,
    pub qualification_complete: bool,
    pub turns_since_pricing: u32,
    owner: Owner,
    messages: Vec<ChatMessage>,
}

impl ConversationState {
    pub fn new(
        thread_id: ThreadId,
        influencer_phone: impl Into<String>,
        agent_id: impl Into<String>,
        target_rate: Decimal,
    ) -> Self {
        Self {
            thread_id,
            influencer_phone: influencer_phone.into(),
            agent_id: agent_id.into(),
            qualification: QualificationFields::default(),
            target_rate,
            price_range: None,
            benchmark: None,
            approval_required: false,
            proposed_price: None,
            reviewed_price: None,
            last_user_message: String::new(),
            current_stage: None,
            qualification_complete: false,
            turns_since_pricing: 0,
            owner: Owner::Agent,
            messages: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.messages.extend(history);
        self
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn hand_off_to_human(&mut self) {
        self.owner = Owner::Human;
    }

    /// Applies an owner read from storage. Ownership only ever escalates to a human.
    pub fn observe_owner(&mut self, owner: Owner) {
        if owner == Owner::Human {
            self.owner = Owner::Human;
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn recent_messages(&self, limit: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(limit);
        &self.messages[start..]
    }

    pub fn append_message(&mut self, role: MessageRole, content: impl Into<String>) {
        self.messages.push(ChatMessage::new(role, content));
    }

    pub fn last_assistant_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|message| message.role == MessageRole::Assistant)
    }

    /// Records the inbound message that starts a new turn.
    pub fn begin_turn(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.append_message(MessageRole::User, text.clone());
        self.last_user_message = text;
        if self.price_range.is_some() {
            self.turns_since_pricing = self.turns_since_pricing.saturating_add(1);
        }
    }

    pub fn missing_fields(&self) -> Vec<QualificationField> {
        self.qualification.missing()
    }

    /// Merges extracted values under first-write-wins. The proposed price is the exception:
    /// the latest mention always replaces it. Returns the qualification fields filled by
    /// this merge.
    pub fn merge_extracted(&mut self, extracted: ExtractedFields) -> Vec<QualificationField> {
        let mut filled = Vec::new();
        let fields = &mut self.qualification;

        if fields.platform.is_none() {
            if let Some(platform) = extracted.platform {
                fields.platform = Some(platform);
                filled.push(QualificationField::Platform);
            }
        }
        if fields.deliverable_type.is_none() {
            if let Some(deliverable) = extracted.deliverable_type {
                fields.deliverable_type = Some(deliverable);
                filled.push(QualificationField::DeliverableType);
            }
        }
        if fields.avg_views.is_none() {
            if let Some(views) = extracted.avg_views.filter(|views| *views > 0) {
                fields.avg_views = Some(views);
                filled.push(QualificationField::AvgViews);
            }
        }
        if fields.quantity.is_none() {
            if let Some(quantity) = extracted.quantity.filter(|quantity| *quantity > 0) {
                fields.quantity = Some(quantity);
                filled.push(QualificationField::Quantity);
            }
        }
        if fields.deadline.is_none() {
            if let Some(deadline) = non_blank(extracted.deadline) {
                fields.deadline = Some(deadline);
                filled.push(QualificationField::Deadline);
            }
        }
        if fields.niche.is_none() {
            fields.niche = non_blank(extracted.niche).map(|niche| niche.to_lowercase());
        }

        if let Some(price) = extracted.proposed_price.filter(|price| *price > Decimal::ZERO) {
            self.proposed_price = Some(price);
        }

        self.qualification_complete = self.qualification.is_complete();
        filled
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|text| text.trim().to_owned()).filter(|text| !text.is_empty())
}
