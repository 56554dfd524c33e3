use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use ai_client::{Completion, LlmClient};
use loreforge_common::{Community, CommunitySummary, Entity, EntityRelationship, LoreforgeError};
use loreforge_store::{EntityStore, SummaryStore};

/// Members and relationships included in one summary prompt.
const MAX_MEMBERS: usize = 50;
const MAX_RELATIONSHIPS: usize = 50;
/// Characters of entity content quoted per member.
const CONTENT_SNIPPET: usize = 300;
const MAX_KEY_ENTITIES: usize = 10;

const SUMMARY_TEMPERATURE: f32 = 0.3;
const SUMMARY_MAX_TOKENS: u32 = 2000;

/// The narrative scope a summary is written at, by community level.
fn level_scope(level: i32) -> &'static str {
    match level {
        0 => "world",
        1 => "region",
        2 => "location",
        _ => "entity",
    }
}

/// Names of members that the generated summary actually mentions, capped.
pub fn extract_key_entities(summary: &str, member_names: &[String], max: usize) -> Vec<String> {
    let lowered = summary.to_lowercase();
    member_names
        .iter()
        .filter(|name| !name.is_empty() && lowered.contains(&name.to_lowercase()))
        .take(max)
        .cloned()
        .collect()
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Generates LLM summaries for detected communities. Batching is sequential
/// to respect provider rate limits; one failed community never aborts the
/// batch.
pub struct CommunitySummarizer {
    llm: Arc<dyn LlmClient>,
    entities: EntityStore,
    summaries: SummaryStore,
}

impl CommunitySummarizer {
    pub fn new(llm: Arc<dyn LlmClient>, entities: EntityStore, summaries: SummaryStore) -> Self {
        Self {
            llm,
            entities,
            summaries,
        }
    }

    /// Summarize each community in turn. Returns how many summaries landed.
    pub async fn generate_for_communities(
        &self,
        communities: &[Community],
    ) -> Result<usize, LoreforgeError> {
        let mut generated = 0usize;
        for community in communities {
            match self.summarize_one(community).await {
                Ok(()) => generated += 1,
                Err(e) => {
                    warn!(
                        community = %community.id,
                        error = %e,
                        "community summary failed, continuing batch"
                    );
                }
            }
        }
        info!(
            requested = communities.len(),
            generated, "community summary batch finished"
        );
        Ok(generated)
    }

    async fn summarize_one(&self, community: &Community) -> Result<(), LoreforgeError> {
        let mut members: Vec<Entity> = Vec::new();
        for id in community.entity_ids.iter().take(MAX_MEMBERS) {
            if let Some(entity) = self
                .entities
                .get(id)
                .await
                .map_err(|e| LoreforgeError::Transient(e.to_string()))?
            {
                members.push(entity);
            }
        }
        if members.is_empty() {
            return Err(LoreforgeError::NotFound(format!(
                "community {} has no loadable members",
                community.id
            )));
        }

        let relationships: Vec<EntityRelationship> = self
            .entities
            .list_relationships_among(&community.campaign_id, &community.entity_ids)
            .await
            .map_err(|e| LoreforgeError::Transient(e.to_string()))?
            .into_iter()
            .take(MAX_RELATIONSHIPS)
            .collect();

        let prompt = build_prompt(community, &members, &relationships);
        let summary_text = self
            .llm
            .complete(
                Completion::new(
                    "You are a campaign lore archivist. Write a tight narrative summary of the \
                     given group of campaign elements. Plain prose, no headings, no lists.",
                    prompt,
                )
                .temperature(SUMMARY_TEMPERATURE)
                .max_tokens(SUMMARY_MAX_TOKENS),
            )
            .await
            .map_err(|e| LoreforgeError::Transient(e.to_string()))?;

        let member_names: Vec<String> = members.iter().map(|m| m.name.clone()).collect();
        let key_entities = extract_key_entities(&summary_text, &member_names, MAX_KEY_ENTITIES);

        self.summaries
            .upsert(&CommunitySummary {
                id: Uuid::new_v4().to_string(),
                community_id: community.id.clone(),
                campaign_id: community.campaign_id.clone(),
                level: community.level,
                summary_text,
                key_entities,
                metadata: serde_json::json!({ "member_count": community.entity_ids.len() }),
            })
            .await
            .map_err(|e| LoreforgeError::Transient(e.to_string()))?;

        Ok(())
    }
}

fn build_prompt(
    community: &Community,
    members: &[Entity],
    relationships: &[EntityRelationship],
) -> String {
    let scope = level_scope(community.level);
    let mut prompt = format!(
        "Summarize this group at {scope} scope ({} members).\n\nMembers:\n",
        members.len()
    );
    for member in members {
        let snippet = truncate_chars(&member.content.to_string(), CONTENT_SNIPPET);
        prompt.push_str(&format!(
            "- {} ({}): {}\n",
            member.name, member.entity_type, snippet
        ));
    }
    if !relationships.is_empty() {
        prompt.push_str("\nRelationships:\n");
        for rel in relationships {
            prompt.push_str(&format!(
                "- {} --{}--> {}\n",
                rel.from_entity_id, rel.relationship_type, rel.to_entity_id
            ));
        }
    }
    prompt
}
