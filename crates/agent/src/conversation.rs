//! Deterministic field extraction from Portuguese influencer messages, and decoding of the
//! `extract_info` tool arguments a model returns.

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};

use negotiator_core::domain::conversation::{DeliverableType, ExtractedFields, Platform};
use negotiator_core::domain::money::{parse_brl, split_multiplier};

const VIEW_WORDS: [&str; 9] = [
    "views",
    "view",
    "visualizações",
    "visualizacoes",
    "visualização",
    "visualizacao",
    "visus",
    "plays",
    "alcance",
];

const DEADLINE_PHRASES: [&str; 11] = [
    "semana que vem",
    "próxima semana",
    "proxima semana",
    "essa semana",
    "esta semana",
    "mês que vem",
    "mes que vem",
    "próximo mês",
    "fim do mês",
    "amanhã",
    "hoje",
];

const NICHES: [(&str, &str); 19] = [
    ("fitness", "fitness"),
    ("academia", "fitness"),
    ("moda", "moda"),
    ("fashion", "moda"),
    ("beleza", "beleza"),
    ("maquiagem", "beleza"),
    ("makeup", "beleza"),
    ("tech", "tech"),
    ("tecnologia", "tech"),
    ("games", "games"),
    ("gamer", "games"),
    ("humor", "humor"),
    ("comédia", "humor"),
    ("culinária", "culinaria"),
    ("culinaria", "culinaria"),
    ("gastronomia", "culinaria"),
    ("viagem", "viagem"),
    ("viagens", "viagem"),
    ("finanças", "financas"),
];

/// Pulls qualification fields out of one message without a language model.
#[derive(Clone, Debug, Default)]
pub struct KeywordExtractor;

impl KeywordExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, text: &str) -> ExtractedFields {
        let normalized_text = normalize_text(text);
        let tokens = tokenize(&normalized_text);

        let deliverable_type = extract_deliverable(&tokens);
        let platform = extract_platform(&tokens).or_else(|| {
            tokens
                .iter()
                .any(|token| token == "reel" || token == "reels")
                .then_some(Platform::Instagram)
        });

        ExtractedFields {
            platform,
            deliverable_type,
            avg_views: extract_views(&tokens),
            quantity: extract_quantity(&tokens),
            deadline: extract_deadline(&normalized_text, &tokens),
            niche: extract_niche(&tokens),
            proposed_price: extract_price(&tokens),
        }
    }
}

/// Decodes `extract_info` arguments. Unknown enum values and malformed numbers are dropped
/// field by field; a non-object yields an empty extraction.
pub fn parse_extract_info(arguments: &Value) -> ExtractedFields {
    let Some(object) = arguments.as_object() else {
        return ExtractedFields::default();
    };
    let text = |key: &str| {
        object
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    };

    ExtractedFields {
        platform: text("platform").and_then(|value| Platform::from_str(&value).ok()),
        deliverable_type: text("deliverable_type")
            .and_then(|value| DeliverableType::from_str(&value).ok()),
        avg_views: object.get("avg_views").and_then(count_value),
        quantity: object
            .get("qty")
            .or_else(|| object.get("quantity"))
            .and_then(count_value)
            .and_then(|quantity| u32::try_from(quantity).ok()),
        deadline: text("deadline"),
        niche: text("niche"),
        proposed_price: object
            .get("proposed_price_brl")
            .or_else(|| object.get("proposed_price"))
            .and_then(money_value),
    }
}

/// Encodes fields in the `extract_info` argument shape, omitting unknown values.
pub fn to_extract_info(fields: &ExtractedFields) -> Value {
    let mut object = Map::new();
    if let Some(platform) = fields.platform {
        object.insert("platform".to_owned(), Value::from(platform.as_str()));
    }
    if let Some(deliverable) = fields.deliverable_type {
        object.insert("deliverable_type".to_owned(), Value::from(deliverable.as_str()));
    }
    if let Some(views) = fields.avg_views {
        object.insert("avg_views".to_owned(), Value::from(views));
    }
    if let Some(quantity) = fields.quantity {
        object.insert("qty".to_owned(), Value::from(quantity));
    }
    if let Some(deadline) = &fields.deadline {
        object.insert("deadline".to_owned(), Value::from(deadline.as_str()));
    }
    if let Some(niche) = &fields.niche {
        object.insert("niche".to_owned(), Value::from(niche.as_str()));
    }
    if let Some(price) = fields.proposed_price {
        let number = price.to_f64().and_then(Number::from_f64);
        object.insert(
            "proposed_price_brl".to_owned(),
            number.map(Value::Number).unwrap_or_else(|| Value::from(price.to_string())),
        );
    }
    Value::Object(object)
}

fn count_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|value| *value >= 0.0).map(|value| value as u64)),
        Value::String(text) => parse_count(&normalize_text(text).replace(' ', "")),
        _ => None,
    }
}

fn money_value(value: &Value) -> Option<Decimal> {
    let amount = match value {
        Value::Number(number) => Decimal::from_str(&number.to_string()).ok(),
        Value::String(text) => parse_brl(&normalize_text(text)),
        _ => None,
    }?;
    (amount > Decimal::ZERO).then_some(amount)
}

fn normalize_text(text: &str) -> String {
    text.to_lowercase()
}

fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_alphanumeric() || matches!(character, '$' | '.' | ',' | '/') {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }
    sanitized
        .split_whitespace()
        .map(|token| token.trim_matches(|ch| matches!(ch, '.' | ',')).to_owned())
        .filter(|token| !token.is_empty())
        .collect()
}

fn extract_platform(tokens: &[String]) -> Option<Platform> {
    tokens.iter().enumerate().find_map(|(index, token)| {
        if token == "tik" && tokens.get(index + 1).is_some_and(|next| next == "tok") {
            return Some(Platform::TikTok);
        }
        Platform::from_str(token).ok()
    })
}

fn extract_deliverable(tokens: &[String]) -> Option<DeliverableType> {
    tokens.iter().find_map(|token| DeliverableType::from_str(token).ok())
}

/// A count at `index`, with a following `mil` folded in. Returns the value and the index
/// of the next unread token.
fn count_at(tokens: &[String], index: usize) -> Option<(u64, usize)> {
    let value = parse_count(&tokens[index])?;
    match tokens.get(index + 1) {
        Some(next) if next == "mil" => Some((value.saturating_mul(1_000), index + 2)),
        _ => Some((value, index + 1)),
    }
}

fn extract_views(tokens: &[String]) -> Option<u64> {
    for index in 0..tokens.len() {
        let Some((value, next)) = count_at(tokens, index) else {
            continue;
        };
        let unit_follows = tokens
            .get(next)
            .is_some_and(|unit| VIEW_WORDS.contains(&unit.as_str()))
            || (tokens.get(next).is_some_and(|unit| unit == "de")
                && tokens.get(next + 1).is_some_and(|unit| VIEW_WORDS.contains(&unit.as_str())));
        let average_precedes = tokens[index.saturating_sub(3)..index]
            .iter()
            .any(|word| word == "média" || word == "media");
        if value > 0 && (unit_follows || average_precedes) {
            return Some(value);
        }
    }
    None
}

fn extract_quantity(tokens: &[String]) -> Option<u32> {
    for window in tokens.windows(2) {
        if let [value, unit] = window {
            if DeliverableType::from_str(unit).is_err() {
                continue;
            }
            let quantity = value.parse::<u32>().ok().or_else(|| number_word(value));
            if let Some(quantity) = quantity.filter(|quantity| (1..=100).contains(quantity)) {
                return Some(quantity);
            }
        }
    }
    None
}

fn number_word(token: &str) -> Option<u32> {
    match token {
        "um" | "uma" => Some(1),
        "dois" | "duas" => Some(2),
        "três" | "tres" => Some(3),
        "quatro" => Some(4),
        "cinco" => Some(5),
        "seis" => Some(6),
        "dez" => Some(10),
        _ => None,
    }
}

fn extract_deadline(normalized_text: &str, tokens: &[String]) -> Option<String> {
    for (index, token) in tokens.iter().enumerate() {
        if matches!(token.as_str(), "até" | "ate" | "para" | "pra" | "prazo" | "dia") {
            let date = tokens[index + 1..]
                .iter()
                .take(3)
                .find(|candidate| is_date(candidate));
            if let Some(date) = date {
                return Some(format!("até {date}"));
            }
        }
        if let (Ok(amount), Some(unit)) = (token.parse::<u32>(), tokens.get(index + 1)) {
            if matches!(unit.as_str(), "dia" | "dias" | "semana" | "semanas" | "mês" | "meses") {
                return Some(format!("{amount} {unit}"));
            }
        }
    }

    DEADLINE_PHRASES
        .iter()
        .find(|phrase| normalized_text.contains(**phrase))
        .map(|phrase| (*phrase).to_owned())
}

fn is_date(token: &str) -> bool {
    let parts: Vec<&str> = token.split('/').collect();
    (2..=3).contains(&parts.len())
        && parts.iter().all(|part| !part.is_empty() && part.chars().all(|ch| ch.is_ascii_digit()))
}

fn extract_niche(tokens: &[String]) -> Option<String> {
    let labelled = tokens.iter().position(|token| token == "nicho").and_then(|index| {
        tokens[index + 1..]
            .iter()
            .find(|token| !matches!(token.as_str(), "de" | "é" | "e" | "do" | "da" | "meu"))
            .cloned()
    });

    labelled.or_else(|| {
        tokens.iter().find_map(|token| {
            NICHES
                .iter()
                .find(|(keyword, _)| keyword == token)
                .map(|(_, niche)| (*niche).to_owned())
        })
    })
}

fn extract_price(tokens: &[String]) -> Option<Decimal> {
    for (index, token) in tokens.iter().enumerate() {
        let candidate = if token == "r$" {
            tokens.get(index + 1).map(|next| {
                let suffix = tokens.get(index + 2).filter(|unit| *unit == "mil");
                match suffix {
                    Some(_) => format!("{next}mil"),
                    None => next.clone(),
                }
            })
        } else if token.starts_with("r$") {
            Some(token.clone())
        } else if tokens.get(index + 1).is_some_and(|unit| unit == "reais") {
            Some(token.clone())
        } else {
            None
        };

        if let Some(amount) = candidate.as_deref().and_then(parse_brl) {
            if amount > Decimal::ZERO {
                return Some(amount);
            }
        }
    }
    None
}

/// Parses view counts such as `100k`, `1,5m`, `100mil` or `100.000`.
fn parse_count(token: &str) -> Option<u64> {
    let (digits, multiplier) = split_multiplier(token);
    if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit() || ch == '.' || ch == ',')
    {
        return None;
    }
    let value = if multiplier == 1 {
        Decimal::from_str(&digits.replace(['.', ','], "")).ok()?
    } else {
        Decimal::from_str(&digits.replace(',', ".")).ok()?
    };
    (value * Decimal::from(multiplier)).trunc().to_u64()
}
