//! Projects shard candidates into knowledge-graph entities and
//! relationships, and assembles the changelog payload describing the batch.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use loreforge_common::{
    entity_id, ChangelogPayload, Entity, EntityChange, EntityMetadata, EntityRelationship,
    EntityUpdate, NewEntity, RelationshipMetadata, RelationshipType, RelationshipUpdate,
};

use crate::shard_factory::ShardCandidate;

#[derive(Debug, Default)]
pub struct Projection {
    pub entities: Vec<Entity>,
    pub relationships: Vec<EntityRelationship>,
    /// Diagnostics for dropped items (no name, unresolved targets).
    pub dropped: Vec<String>,
    pub payload: ChangelogPayload,
}

/// Entity ids this batch would produce, for pre-checking which already exist.
pub fn candidate_entity_ids(campaign_id: &str, candidates: &[ShardCandidate]) -> Vec<String> {
    let mut ids: Vec<String> = candidates
        .iter()
        .filter_map(|c| item_name(&c.content()).map(|name| entity_id(campaign_id, &name)))
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

/// Relationship target ids this batch references (in normalized form).
pub fn candidate_target_ids(campaign_id: &str, candidates: &[ShardCandidate]) -> Vec<String> {
    let mut ids: Vec<String> = candidates
        .iter()
        .flat_map(|c| {
            raw_relationships(&c.content())
                .into_iter()
                .map(|raw| entity_id(campaign_id, &raw.target))
                .collect::<Vec<_>>()
        })
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

/// Turn candidates into entities and relationships.
///
/// Entity ids are `<campaignId>_<slug(name)>`; everything lands in staging
/// until reviewed. Relationship targets must resolve to an id in this batch
/// or in `existing_ids` — unresolved targets are dropped with a diagnostic.
pub fn project(
    campaign_id: &str,
    candidates: &[ShardCandidate],
    existing_ids: &HashSet<String>,
    now: DateTime<Utc>,
) -> Projection {
    let mut projection = Projection::default();
    projection.payload.timestamp = now.timestamp_millis();

    let mut batch_ids: HashSet<String> = HashSet::new();
    let mut new_seen: HashSet<String> = HashSet::new();
    let mut updated_seen: HashSet<String> = HashSet::new();

    // First pass: entities, so relationship targets can resolve batch-wide.
    let mut sources: Vec<(String, Vec<RawRelationship>)> = Vec::new();
    for candidate in candidates {
        let content = candidate.content();
        let Some(name) = item_name(&content) else {
            projection
                .dropped
                .push(format!("shard {} has no name, skipped", candidate.id));
            continue;
        };
        let id = entity_id(campaign_id, &name);
        batch_ids.insert(id.clone());
        sources.push((id.clone(), raw_relationships(&content)));

        projection.entities.push(Entity {
            id: id.clone(),
            campaign_id: campaign_id.to_string(),
            entity_type: candidate.metadata.entity_type,
            name,
            content,
            metadata: EntityMetadata::default(), // staging
            created_at: now,
            updated_at: now,
        });

        if existing_ids.contains(&id) {
            if updated_seen.insert(id.clone()) {
                projection.payload.entity_updates.push(EntityUpdate {
                    entity_id: id,
                    change: EntityChange::Modified,
                    detail: Some("re-extracted".to_string()),
                });
            }
        } else if new_seen.insert(id.clone()) {
            projection.payload.new_entities.push(NewEntity {
                entity_id: id,
                name: projection.entities.last().map(|e| e.name.clone()),
                entity_type: Some(candidate.metadata.entity_type),
            });
        }
    }

    // Second pass: relationships, deduplicated per (from, to, type).
    let mut edge_seen: HashSet<(String, String, RelationshipType)> = HashSet::new();
    for (from_id, rels) in sources {
        for raw in rels {
            let to_id = entity_id(campaign_id, &raw.target);
            if !batch_ids.contains(&to_id) && !existing_ids.contains(&to_id) {
                projection.dropped.push(format!(
                    "relationship {from_id} -> {to_id} dropped: unresolved target"
                ));
                continue;
            }
            if to_id == from_id {
                continue;
            }
            let rel_type = RelationshipType::parse_lenient(&raw.rel_type);
            if !edge_seen.insert((from_id.clone(), to_id.clone(), rel_type)) {
                continue;
            }

            projection.relationships.push(EntityRelationship {
                id: Uuid::new_v4().to_string(),
                campaign_id: campaign_id.to_string(),
                from_entity_id: from_id.clone(),
                to_entity_id: to_id.clone(),
                relationship_type: rel_type,
                strength: raw.strength.clamp(0.0, 1.0),
                metadata: RelationshipMetadata::default(), // staging
            });
            projection.payload.relationship_updates.push(RelationshipUpdate {
                from_entity_id: from_id.clone(),
                to_entity_id: to_id,
                relationship_type: Some(rel_type),
                detail: None,
            });
        }
    }

    projection
}

struct RawRelationship {
    target: String,
    rel_type: String,
    strength: f64,
}

fn item_name(content: &Value) -> Option<String> {
    content
        .get("name")
        .or_else(|| content.get("title"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn raw_relationships(content: &Value) -> Vec<RawRelationship> {
    let Some(items) = content.get("relationships").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let target = item
                .get("target_id")
                .or_else(|| item.get("target"))
                .and_then(Value::as_str)?;
            Some(RawRelationship {
                target: target.to_string(),
                rel_type: item
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("related_to")
                    .to_string(),
                strength: item.get("strength").and_then(Value::as_f64).unwrap_or(0.5),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use loreforge_common::{ContentType, ShardMetadata, ShardStatus};
    use serde_json::json;

    fn candidate(id: &str, content: serde_json::Value, entity_type: ContentType) -> ShardCandidate {
        ShardCandidate {
            id: id.to_string(),
            text: content.to_string(),
            metadata: ShardMetadata {
                campaign_id: "c1".to_string(),
                resource_id: "r1".to_string(),
                resource_name: "tome.pdf".to_string(),
                entity_type,
                confidence: 0.8,
                source_ref: None,
            },
            source_ref: None,
        }
    }

    #[test]
    fn entity_ids_are_tenant_scoped_slugs() {
        let candidates = vec![candidate(
            "s1",
            json!({"name": "Strahd von Zarovich"}),
            ContentType::Npc,
        )];
        let p = project("c1", &candidates, &HashSet::new(), Utc::now());
        assert_eq!(p.entities.len(), 1);
        assert_eq!(p.entities[0].id, "c1_strahd_von_zarovich");
        assert_eq!(p.entities[0].metadata.shard_status, ShardStatus::Staging);
    }

    #[test]
    fn known_entities_become_updates_not_new() {
        let candidates = vec![candidate("s1", json!({"name": "Strahd"}), ContentType::Npc)];
        let existing: HashSet<String> = ["c1_strahd".to_string()].into();
        let p = project("c1", &candidates, &existing, Utc::now());
        assert_eq!(p.payload.entity_updates.len(), 1);
        assert!(p.payload.new_entities.is_empty());
    }

    #[test]
    fn relationships_resolve_within_batch() {
        let candidates = vec![
            candidate(
                "s1",
                json!({
                    "name": "Strahd",
                    "relationships": [
                        {"type": "enemy_of", "target": "Ireena", "strength": 0.9}
                    ]
                }),
                ContentType::Npc,
            ),
            candidate("s2", json!({"name": "Ireena"}), ContentType::Npc),
        ];
        let p = project("c1", &candidates, &HashSet::new(), Utc::now());
        assert_eq!(p.relationships.len(), 1);
        let rel = &p.relationships[0];
        assert_eq!(rel.from_entity_id, "c1_strahd");
        assert_eq!(rel.to_entity_id, "c1_ireena");
        assert_eq!(rel.relationship_type, RelationshipType::EnemyOf);
        assert_eq!(rel.strength, 0.9);
        assert_eq!(rel.metadata.status, ShardStatus::Staging);
    }

    #[test]
    fn unknown_relationship_types_fall_back_to_related_to() {
        let candidates = vec![
            candidate(
                "s1",
                json!({
                    "name": "A",
                    "relationships": [{"type": "nemesis_of", "target": "B"}]
                }),
                ContentType::Npc,
            ),
            candidate("s2", json!({"name": "B"}), ContentType::Npc),
        ];
        let p = project("c1", &candidates, &HashSet::new(), Utc::now());
        assert_eq!(
            p.relationships[0].relationship_type,
            RelationshipType::RelatedTo
        );
    }

    #[test]
    fn unresolved_targets_are_dropped_with_diagnostics() {
        let candidates = vec![candidate(
            "s1",
            json!({
                "name": "A",
                "relationships": [{"type": "allied_with", "target": "Nobody"}]
            }),
            ContentType::Npc,
        )];
        let p = project("c1", &candidates, &HashSet::new(), Utc::now());
        assert!(p.relationships.is_empty());
        assert_eq!(p.dropped.len(), 1);
        assert!(p.dropped[0].contains("unresolved target"));
    }

    #[test]
    fn targets_resolve_against_existing_entities_too() {
        let candidates = vec![candidate(
            "s1",
            json!({
                "name": "A",
                "relationships": [{"type": "located_in", "target": "Barovia"}]
            }),
            ContentType::Npc,
        )];
        let existing: HashSet<String> = ["c1_barovia".to_string()].into();
        let p = project("c1", &candidates, &existing, Utc::now());
        assert_eq!(p.relationships.len(), 1);
        assert_eq!(p.payload.relationship_updates.len(), 1);
    }

    #[test]
    fn nameless_items_are_skipped_with_diagnostics() {
        let candidates = vec![candidate("s1", json!({"cr": 5}), ContentType::Monster)];
        let p = project("c1", &candidates, &HashSet::new(), Utc::now());
        assert!(p.entities.is_empty());
        assert_eq!(p.dropped.len(), 1);
    }

    #[test]
    fn strength_is_clamped_to_unit_interval() {
        let candidates = vec![
            candidate(
                "s1",
                json!({
                    "name": "A",
                    "relationships": [{"type": "owns", "target": "B", "strength": 7.0}]
                }),
                ContentType::Npc,
            ),
            candidate("s2", json!({"name": "B"}), ContentType::Item),
        ];
        let p = project("c1", &candidates, &HashSet::new(), Utc::now());
        assert_eq!(p.relationships[0].strength, 1.0);
    }
}
