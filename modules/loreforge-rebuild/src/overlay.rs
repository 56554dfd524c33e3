use std::collections::HashMap;

use serde::Serialize;

use loreforge_common::{ChangelogEntry, EntityUpdate, NewEntity, RelationshipUpdate};

/// Read-time projection of unapplied changelog entries. Clients layer this
/// over stale graph reads to see current world state without waiting for the
/// next rebuild.
#[derive(Debug, Default, Clone, Serialize)]
pub struct WorldOverlay {
    /// Latest update per entity id.
    pub entity_state: HashMap<String, EntityUpdate>,
    /// Latest update per `from::to` pair.
    pub relationship_state: HashMap<String, RelationshipUpdate>,
    /// Entities introduced since the last applied rebuild.
    pub new_entities: HashMap<String, NewEntity>,
}

impl WorldOverlay {
    pub fn is_empty(&self) -> bool {
        self.entity_state.is_empty()
            && self.relationship_state.is_empty()
            && self.new_entities.is_empty()
    }
}

fn relationship_key(update: &RelationshipUpdate) -> String {
    format!("{}::{}", update.from_entity_id, update.to_entity_id)
}

/// Fold entries (already in `(timestamp, insertion id)` order) into an
/// overlay. Last write wins per entity / relationship key.
pub fn reduce_overlay(entries: &[ChangelogEntry]) -> WorldOverlay {
    let mut overlay = WorldOverlay::default();

    for entry in entries {
        for new in &entry.payload.new_entities {
            overlay
                .new_entities
                .insert(new.entity_id.clone(), new.clone());
        }
        for update in &entry.payload.entity_updates {
            overlay
                .entity_state
                .insert(update.entity_id.clone(), update.clone());
        }
        for update in &entry.payload.relationship_updates {
            overlay
                .relationship_state
                .insert(relationship_key(update), update.clone());
        }
    }

    overlay
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use loreforge_common::{ChangelogPayload, EntityChange};

    fn entry(
        seq: i64,
        entity_updates: Vec<EntityUpdate>,
        relationship_updates: Vec<RelationshipUpdate>,
        new_entities: Vec<NewEntity>,
    ) -> ChangelogEntry {
        ChangelogEntry {
            id: format!("cl{seq}"),
            campaign_id: "c1".to_string(),
            campaign_session_id: None,
            timestamp: Utc::now(),
            payload: ChangelogPayload {
                timestamp: seq,
                entity_updates,
                relationship_updates,
                new_entities,
            },
            impact_score: 0.0,
            applied_to_graph: false,
        }
    }

    fn modified(id: &str, detail: &str) -> EntityUpdate {
        EntityUpdate {
            entity_id: id.to_string(),
            change: EntityChange::Modified,
            detail: Some(detail.to_string()),
        }
    }

    #[test]
    fn last_write_wins_per_entity() {
        let entries = vec![
            entry(1, vec![modified("c1_a", "first")], vec![], vec![]),
            entry(2, vec![modified("c1_a", "second")], vec![], vec![]),
        ];
        let overlay = reduce_overlay(&entries);
        assert_eq!(
            overlay.entity_state["c1_a"].detail.as_deref(),
            Some("second")
        );
    }

    #[test]
    fn relationship_keys_are_directional() {
        let forward = RelationshipUpdate {
            from_entity_id: "c1_a".to_string(),
            to_entity_id: "c1_b".to_string(),
            relationship_type: None,
            detail: Some("fwd".to_string()),
        };
        let backward = RelationshipUpdate {
            from_entity_id: "c1_b".to_string(),
            to_entity_id: "c1_a".to_string(),
            relationship_type: None,
            detail: Some("bwd".to_string()),
        };
        let entries = vec![entry(1, vec![], vec![forward, backward], vec![])];
        let overlay = reduce_overlay(&entries);
        assert_eq!(overlay.relationship_state.len(), 2);
        assert_eq!(
            overlay.relationship_state["c1_a::c1_b"].detail.as_deref(),
            Some("fwd")
        );
    }

    #[test]
    fn deletion_after_modification_is_the_visible_state() {
        let delete = EntityUpdate {
            entity_id: "c1_a".to_string(),
            change: EntityChange::Deleted,
            detail: None,
        };
        let entries = vec![
            entry(1, vec![modified("c1_a", "edit")], vec![], vec![]),
            entry(2, vec![delete], vec![], vec![]),
        ];
        let overlay = reduce_overlay(&entries);
        assert_eq!(overlay.entity_state["c1_a"].change, EntityChange::Deleted);
    }

    #[test]
    fn new_entities_accumulate_by_id() {
        let n = |id: &str| NewEntity {
            entity_id: id.to_string(),
            name: None,
            entity_type: None,
        };
        let entries = vec![
            entry(1, vec![], vec![], vec![n("c1_a"), n("c1_b")]),
            entry(2, vec![], vec![], vec![n("c1_a")]),
        ];
        let overlay = reduce_overlay(&entries);
        assert_eq!(overlay.new_entities.len(), 2);
    }

    #[test]
    fn empty_input_is_an_empty_overlay() {
        assert!(reduce_overlay(&[]).is_empty());
    }
}
