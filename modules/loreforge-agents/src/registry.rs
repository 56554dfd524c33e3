use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The closed set of specialized agents. Routing can only land on one of
/// these; anything else the router says falls back to the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Campaign structure: create, organize, and plan campaigns.
    CampaignManager,
    /// World lore: entities, relationships, communities, summaries.
    WorldArchivist,
    /// Rules questions answered from indexed source material.
    RulesAdvisor,
    /// File and resource management: uploads, attachments, indexing.
    ResourceLibrarian,
}

impl AgentType {
    pub const ALL: [AgentType; 4] = [
        AgentType::CampaignManager,
        AgentType::WorldArchivist,
        AgentType::RulesAdvisor,
        AgentType::ResourceLibrarian,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::CampaignManager => "campaign_manager",
            AgentType::WorldArchivist => "world_archivist",
            AgentType::RulesAdvisor => "rules_advisor",
            AgentType::ResourceLibrarian => "resource_librarian",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AgentType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        AgentType::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown AgentType: {s}"))
    }
}

#[derive(Debug, Clone)]
pub struct AgentDescriptor {
    pub agent_type: AgentType,
    pub description: &'static str,
    pub system_prompt: &'static str,
    /// Tool names this agent may invoke, dispatched via the tool runtime.
    pub tools: &'static [&'static str],
}

/// Registry of agent descriptors, built once at startup. No reflection: a
/// plain table keyed by the closed enum.
pub struct AgentRegistry {
    agents: HashMap<AgentType, AgentDescriptor>,
    default: AgentType,
}

impl AgentRegistry {
    pub fn new() -> Self {
        let descriptors = [
            AgentDescriptor {
                agent_type: AgentType::CampaignManager,
                description: "creates and organizes campaigns, tracks planning state",
                system_prompt: "You manage tabletop campaigns: create them, describe them, and keep their planning state tidy.",
                tools: &["createCampaign", "listCampaigns", "deleteCampaign"],
            },
            AgentDescriptor {
                agent_type: AgentType::WorldArchivist,
                description: "answers questions about extracted entities, relationships, and world state",
                system_prompt: "You are the archivist of the campaign world graph. Answer from entities, relationships, communities, and summaries.",
                tools: &["listEntities", "deleteEntity", "deleteRelationship"],
            },
            AgentDescriptor {
                agent_type: AgentType::RulesAdvisor,
                description: "answers rules questions from the user's indexed source material",
                system_prompt: "You answer rules questions strictly from the user's indexed documents.",
                tools: &["listEntities"],
            },
            AgentDescriptor {
                agent_type: AgentType::ResourceLibrarian,
                description: "manages uploaded files, campaign attachments, and indexing",
                system_prompt: "You manage the user's files: uploads, campaign attachments, metadata, and re-indexing.",
                tools: &["listFiles", "updatePdfMetadata", "deletePdfFile"],
            },
        ];

        Self {
            agents: descriptors
                .into_iter()
                .map(|d| (d.agent_type, d))
                .collect(),
            default: AgentType::CampaignManager,
        }
    }

    pub fn get(&self, agent_type: AgentType) -> &AgentDescriptor {
        &self.agents[&agent_type]
    }

    pub fn default_agent(&self) -> AgentType {
        self.default
    }

    /// `agentType: description` lines for the routing prompt, in a stable
    /// order.
    pub fn routing_catalog(&self) -> String {
        AgentType::ALL
            .iter()
            .map(|a| format!("{}: {}", a, self.agents[a].description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_agent_type_is_registered() {
        let registry = AgentRegistry::new();
        for agent in AgentType::ALL {
            assert_eq!(registry.get(agent).agent_type, agent);
        }
    }

    #[test]
    fn catalog_lists_every_agent_once() {
        let catalog = AgentRegistry::new().routing_catalog();
        for agent in AgentType::ALL {
            assert_eq!(catalog.matches(agent.as_str()).count(), 1);
        }
    }

    #[test]
    fn agent_type_roundtrips() {
        for agent in AgentType::ALL {
            let parsed: AgentType = agent.as_str().parse().unwrap();
            assert_eq!(parsed, agent);
        }
        assert!("bard".parse::<AgentType>().is_err());
    }
}
