//! Pure transformer from parsed AI-search sections into shard candidates.

use serde_json::Value;
use uuid::Uuid;

use loreforge_common::{CampaignResource, ContentType, Shard, ShardMetadata};

use crate::parse::ParsedStructured;

const DEFAULT_CONFIDENCE: f64 = 0.7;

/// One shard candidate as emitted by the factory: the canonical JSON text of
/// the item plus routing metadata.
#[derive(Debug, Clone)]
pub struct ShardCandidate {
    pub id: String,
    pub text: String,
    pub metadata: ShardMetadata,
    pub source_ref: Option<String>,
}

impl ShardCandidate {
    pub fn content(&self) -> Value {
        serde_json::from_str(&self.text).unwrap_or(Value::Null)
    }

    pub fn into_shard(self) -> Shard {
        let content = self.content();
        Shard {
            id: self.id,
            campaign_id: self.metadata.campaign_id.clone(),
            resource_id: self.metadata.resource_id.clone(),
            shard_type: self.metadata.entity_type,
            content,
            metadata: self.metadata,
        }
    }
}

#[derive(Debug, Default)]
pub struct FactoryOutput {
    pub valid: Vec<ShardCandidate>,
    /// Reasons for rejected items, surfaced as a hidden diagnostic.
    pub invalid: Vec<String>,
}

/// Build candidates for every item of a known content type.
///
/// Ids follow `<resourceId>_<contentType>_<epochMs>[_<index>]_<rand>`; the
/// index disambiguates multiple items in one section.
pub fn build_candidates(
    parsed: &ParsedStructured,
    campaign_id: &str,
    resource: &CampaignResource,
    now_ms: i64,
) -> FactoryOutput {
    let mut output = FactoryOutput::default();
    output.invalid.extend(parsed.dropped.iter().cloned());

    for (content_type, items) in &parsed.sections {
        for (index, item) in items.iter().enumerate() {
            match build_one(item, *content_type, campaign_id, resource, now_ms, index, items.len()) {
                Ok(candidate) => output.valid.push(candidate),
                Err(reason) => output.invalid.push(reason),
            }
        }
    }

    output
}

fn build_one(
    item: &Value,
    content_type: ContentType,
    campaign_id: &str,
    resource: &CampaignResource,
    now_ms: i64,
    index: usize,
    section_len: usize,
) -> Result<ShardCandidate, String> {
    let obj = item
        .as_object()
        .ok_or_else(|| format!("{content_type}[{index}]: item is not an object"))?;
    if obj.is_empty() {
        return Err(format!("{content_type}[{index}]: item is empty"));
    }

    let index_part = if section_len > 1 {
        format!("_{index}")
    } else {
        String::new()
    };
    let rand: String = Uuid::new_v4().simple().to_string()[..8].to_string();
    let id = format!("{}_{content_type}_{now_ms}{index_part}_{rand}", resource.id);

    let confidence = obj
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(DEFAULT_CONFIDENCE)
        .clamp(0.0, 1.0);
    let source_ref = obj
        .get("source_ref")
        .and_then(Value::as_str)
        .map(str::to_string);

    let candidate = ShardCandidate {
        id,
        text: item.to_string(),
        metadata: ShardMetadata {
            campaign_id: campaign_id.to_string(),
            resource_id: resource.id.clone(),
            resource_name: resource.file_name.clone(),
            entity_type: content_type,
            confidence,
            source_ref: source_ref.clone(),
        },
        source_ref,
    };
    validate(&candidate)?;
    Ok(candidate)
}

/// The factory contract: candidates missing an id, text, campaign id, or
/// entity type never leave this module.
fn validate(candidate: &ShardCandidate) -> Result<(), String> {
    if candidate.id.is_empty() {
        return Err("candidate missing id".to_string());
    }
    if candidate.text.is_empty() {
        return Err(format!("candidate {} missing text", candidate.id));
    }
    if candidate.metadata.campaign_id.is_empty() {
        return Err(format!("candidate {} missing campaign id", candidate.id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_ai_response;
    use chrono::Utc;
    use loreforge_common::ExtractionStatus;
    use serde_json::json;

    fn resource() -> CampaignResource {
        CampaignResource {
            id: "r1".to_string(),
            campaign_id: "c1".to_string(),
            file_key: "f1".to_string(),
            file_name: "tome.pdf".to_string(),
            status: ExtractionStatus::Running,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn parsed(raw: serde_json::Value) -> ParsedStructured {
        parse_ai_response(&raw.to_string()).unwrap()
    }

    #[test]
    fn ids_carry_resource_type_and_timestamp() {
        let output = build_candidates(
            &parsed(json!({"monster": [{"name": "Owlbear"}]})),
            "c1",
            &resource(),
            1_700_000_000_000,
        );
        assert_eq!(output.valid.len(), 1);
        let id = &output.valid[0].id;
        assert!(id.starts_with("r1_monster_1700000000000_"), "id was {id}");
    }

    #[test]
    fn multiple_items_get_distinct_indexed_ids() {
        let output = build_candidates(
            &parsed(json!({"npc": [{"name": "A"}, {"name": "B"}]})),
            "c1",
            &resource(),
            1_700_000_000_000,
        );
        assert_eq!(output.valid.len(), 2);
        assert!(output.valid[0].id.contains("_1700000000000_0_"));
        assert!(output.valid[1].id.contains("_1700000000000_1_"));
        assert_ne!(output.valid[0].id, output.valid[1].id);
    }

    #[test]
    fn text_is_canonical_item_json() {
        let output = build_candidates(
            &parsed(json!({"spell": [{"name": "Fireball", "level": 3}]})),
            "c1",
            &resource(),
            0,
        );
        let content = output.valid[0].content();
        assert_eq!(content["name"], "Fireball");
        assert_eq!(content["level"], 3);
    }

    #[test]
    fn non_object_items_are_invalid_with_reasons() {
        let output = build_candidates(
            &parsed(json!({"trap": ["just a string", {"name": "Pit"}]})),
            "c1",
            &resource(),
            0,
        );
        assert_eq!(output.valid.len(), 1);
        assert_eq!(output.invalid.len(), 1);
        assert!(output.invalid[0].contains("trap[0]"));
    }

    #[test]
    fn empty_sections_emit_zero_candidates() {
        let output = build_candidates(
            &parsed(json!({"custom": []})),
            "c1",
            &resource(),
            0,
        );
        assert!(output.valid.is_empty());
        assert!(output.invalid.is_empty());
    }

    #[test]
    fn into_shard_preserves_metadata() {
        let output = build_candidates(
            &parsed(json!({"faction": [{"name": "Keepers of the Feather", "confidence": 0.9}]})),
            "c1",
            &resource(),
            0,
        );
        let shard = output.valid.into_iter().next().unwrap().into_shard();
        assert_eq!(shard.campaign_id, "c1");
        assert_eq!(shard.resource_id, "r1");
        assert_eq!(shard.shard_type, ContentType::Faction);
        assert_eq!(shard.metadata.confidence, 0.9);
    }
}
