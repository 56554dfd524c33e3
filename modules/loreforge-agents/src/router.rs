use std::sync::Arc;

use tracing::{debug, warn};

use ai_client::{Completion, LlmClient};
use loreforge_common::LoreforgeError;

use crate::registry::{AgentRegistry, AgentType};

#[derive(Debug, Clone, PartialEq)]
pub struct RoutedAgent {
    pub agent: AgentType,
    pub confidence: f64,
    pub reason: String,
}

/// Parse the router's `agent|confidence|reason` line. Extra whitespace and a
/// missing reason are tolerated; a missing confidence reads as 0.
pub fn parse_route(text: &str) -> Option<(String, f64, String)> {
    let line = text.trim().lines().next()?.trim();
    let mut parts = line.splitn(3, '|');
    let agent = parts.next()?.trim().to_string();
    if agent.is_empty() {
        return None;
    }
    let confidence = parts
        .next()
        .and_then(|c| c.trim().parse::<f64>().ok())
        .unwrap_or(0.0);
    let reason = parts.next().unwrap_or("").trim().to_string();
    Some((agent, confidence, reason))
}

/// One LLM call at temperature 0 picks the agent for a user message.
/// Unparseable output or an unregistered agent falls back to the default.
pub struct AgentRouter {
    llm: Arc<dyn LlmClient>,
    registry: Arc<AgentRegistry>,
}

impl AgentRouter {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<AgentRegistry>) -> Self {
        Self { llm, registry }
    }

    pub async fn route(&self, message: &str) -> Result<RoutedAgent, LoreforgeError> {
        let prompt = format!(
            "Available agents:\n{}\n\nUser message:\n{}\n\n\
             Reply with exactly one line: agent|confidence|reason \
             (confidence is 0.0-1.0).",
            self.registry.routing_catalog(),
            message
        );

        let response = self
            .llm
            .complete(
                Completion::new(
                    "You route user messages to the best specialized agent.",
                    prompt,
                )
                .temperature(0.0)
                .max_tokens(200),
            )
            .await
            .map_err(|e| LoreforgeError::Transient(e.to_string()))?;

        let fallback = || RoutedAgent {
            agent: self.registry.default_agent(),
            confidence: 0.0,
            reason: "router fallback".to_string(),
        };

        let Some((agent_name, confidence, reason)) = parse_route(&response) else {
            warn!(response, "unparseable routing response, using default agent");
            return Ok(fallback());
        };

        match agent_name.parse::<AgentType>() {
            Ok(agent) => {
                debug!(agent = %agent, confidence, "message routed");
                Ok(RoutedAgent {
                    agent,
                    confidence,
                    reason,
                })
            }
            Err(_) => {
                warn!(agent = %agent_name, "router picked an unregistered agent, using default");
                Ok(fallback())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ai_client::AiError;
    use async_trait::async_trait;

    struct CannedLlm(String);

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn complete(&self, _request: Completion) -> Result<String, AiError> {
            Ok(self.0.clone())
        }
    }

    fn router(response: &str) -> AgentRouter {
        AgentRouter::new(
            Arc::new(CannedLlm(response.to_string())),
            Arc::new(AgentRegistry::new()),
        )
    }

    #[test]
    fn parse_route_splits_three_fields() {
        let (agent, confidence, reason) =
            parse_route("world_archivist|0.92|asks about an NPC").unwrap();
        assert_eq!(agent, "world_archivist");
        assert!((confidence - 0.92).abs() < 1e-9);
        assert_eq!(reason, "asks about an NPC");
    }

    #[test]
    fn parse_route_tolerates_missing_fields() {
        let (agent, confidence, reason) = parse_route("rules_advisor").unwrap();
        assert_eq!(agent, "rules_advisor");
        assert_eq!(confidence, 0.0);
        assert_eq!(reason, "");
    }

    #[test]
    fn parse_route_keeps_pipes_inside_the_reason() {
        let (_, _, reason) = parse_route("a|0.5|x | y | z").unwrap();
        assert_eq!(reason, "x | y | z");
    }

    #[tokio::test]
    async fn registered_agent_is_routed() {
        let routed = router("rules_advisor|0.8|rules question")
            .route("can a rogue sneak attack twice?")
            .await
            .unwrap();
        assert_eq!(routed.agent, AgentType::RulesAdvisor);
        assert!((routed.confidence - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unregistered_agent_falls_back_to_default() {
        let routed = router("dungeon_oracle|0.9|made up")
            .route("hello")
            .await
            .unwrap();
        assert_eq!(routed.agent, AgentType::CampaignManager);
        assert_eq!(routed.reason, "router fallback");
    }

    #[tokio::test]
    async fn garbage_output_falls_back_to_default() {
        let routed = router("   ").route("hello").await.unwrap();
        assert_eq!(routed.agent, AgentType::CampaignManager);
    }
}
