use regex::Regex;

use negotiator_core::config::GuardrailConfig;

pub const SENSITIVE_DATA_REPLY: &str = "Por segurança, não posso coletar dados sensíveis como CPF, número de cartão ou senhas. Por favor, nunca compartilhe essas informações por este canal.";

pub const HANDOFF_REPLY: &str =
    "Entendido! Vou transferir você para um atendente humano. Aguarde um momento, por favor.";

/// Reminder appended to qualification prompts.
pub const HANDOFF_SUFFIX: &str = "\n\n_Se preferir falar com uma pessoa, digite **HUMANO**._";

const REDACTED: &str = "[dado sensível removido]";

const SENSITIVE_PATTERNS: [(&str, &str); 3] = [
    ("sensitive_cpf", r"\b\d{3}\.?\d{3}\.?\d{3}-?\d{2}\b"),
    ("sensitive_card", r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b"),
    ("sensitive_password", r"(?i)\bsenha\s*[:=]\s*\S+"),
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    /// The message carries data the agent must not collect.
    Refuse { reason_code: &'static str, user_message: String },
    /// The counterpart asked for a person.
    Handoff { reason_code: &'static str, user_message: String },
}

/// Stateless message classifiers run before the state machine.
#[derive(Clone, Debug)]
pub struct Guardrails {
    handoff: Option<Regex>,
    sensitive: Vec<(&'static str, Regex)>,
}

impl Guardrails {
    pub fn new<S: AsRef<str>>(handoff_keywords: &[S]) -> Result<Self, regex::Error> {
        let alternatives: Vec<String> = handoff_keywords
            .iter()
            .map(|keyword| keyword.as_ref().trim())
            .filter(|keyword| !keyword.is_empty())
            .map(regex::escape)
            .collect();
        let handoff = if alternatives.is_empty() {
            None
        } else {
            Some(Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))?)
        };

        let sensitive = SENSITIVE_PATTERNS
            .iter()
            .map(|(code, pattern)| Regex::new(pattern).map(|regex| (*code, regex)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { handoff, sensitive })
    }

    pub fn from_config(config: &GuardrailConfig) -> Result<Self, regex::Error> {
        Self::new(config.handoff_keywords.as_slice())
    }

    pub fn requests_human(&self, text: &str) -> bool {
        self.handoff.as_ref().is_some_and(|regex| regex.is_match(text))
    }

    /// Reason code of the first sensitive-data pattern found in `text`.
    pub fn sensitive_match(&self, text: &str) -> Option<&'static str> {
        self.sensitive.iter().find(|(_, regex)| regex.is_match(text)).map(|(code, _)| *code)
    }

    /// Sensitive data wins over a handoff request in the same message.
    pub fn screen(&self, text: &str) -> GuardrailDecision {
        if let Some(reason_code) = self.sensitive_match(text) {
            return GuardrailDecision::Refuse {
                reason_code,
                user_message: SENSITIVE_DATA_REPLY.to_owned(),
            };
        }
        if self.requests_human(text) {
            return GuardrailDecision::Handoff {
                reason_code: "human_requested",
                user_message: HANDOFF_REPLY.to_owned(),
            };
        }
        GuardrailDecision::Allow
    }

    /// Masks every sensitive match so the text can be stored.
    pub fn redact(&self, text: &str) -> String {
        self.sensitive
            .iter()
            .fold(text.to_owned(), |acc, (_, regex)| regex.replace_all(&acc, REDACTED).into_owned())
    }
}

pub fn append_handoff_suffix(text: &str) -> String {
    if text.contains(HANDOFF_SUFFIX) {
        text.to_owned()
    } else {
        format!("{text}{HANDOFF_SUFFIX}")
    }
}
