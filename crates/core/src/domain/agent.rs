use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::errors::ApplicationError;

pub const DEFAULT_AGENT_ID: &str = "negotiator";

const DEFAULT_AGENT_NAME: &str = "Negociador de Influenciadores";
const DEFAULT_PERSONA: &str = "Negociador profissional e cordial de uma agência de marketing de \
influenciadores. Fecha contratos justos apoiado em dados de mercado.";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub agent_id: String,
    pub name: String,
    pub persona: String,
    pub target_rate: Decimal,
}

impl AgentProfile {
    pub fn default_negotiator(target_rate: Decimal) -> Self {
        Self {
            agent_id: DEFAULT_AGENT_ID.to_owned(),
            name: DEFAULT_AGENT_NAME.to_owned(),
            persona: DEFAULT_PERSONA.to_owned(),
            target_rate,
        }
    }
}

/// Agent profiles known to the process. Built once at startup and shared read-only.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AgentRegistry {
    profiles: BTreeMap<String, AgentProfile>,
}

impl AgentRegistry {
    pub fn new(profiles: impl IntoIterator<Item = AgentProfile>) -> Self {
        let mut registry = Self::default();
        for profile in profiles {
            registry.register(profile);
        }
        registry
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry =
            Self::new([AgentProfile::default_negotiator(config.negotiation.default_target_rate)]);
        for agent in &config.agents {
            registry.register(AgentProfile {
                agent_id: agent.agent_id.clone(),
                name: agent.name.clone(),
                persona: agent.persona.clone(),
                target_rate: agent.target_rate.unwrap_or(config.negotiation.default_target_rate),
            });
        }
        registry
    }

    pub fn register(&mut self, profile: AgentProfile) {
        self.profiles.insert(profile.agent_id.clone(), profile);
    }

    pub fn get(&self, agent_id: &str) -> Option<&AgentProfile> {
        self.profiles.get(agent_id)
    }

    pub fn require(&self, agent_id: &str) -> Result<&AgentProfile, ApplicationError> {
        self.get(agent_id).ok_or_else(|| {
            ApplicationError::Configuration(format!("unknown agent `{agent_id}`"))
        })
    }

    pub fn profiles(&self) -> impl Iterator<Item = &AgentProfile> {
        self.profiles.values()
    }
}
