use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LoreforgeError;
use crate::vocab::{ContentType, ImportanceOverride, RelationshipType, ShardStatus};

// --- Files ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Uploading,
    Uploaded,
    Indexing,
    Completed,
    Failed,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileStatus::Uploading => write!(f, "uploading"),
            FileStatus::Uploaded => write!(f, "uploaded"),
            FileStatus::Indexing => write!(f, "indexing"),
            FileStatus::Completed => write!(f, "completed"),
            FileStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for FileStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(Self::Uploading),
            "uploaded" => Ok(Self::Uploaded),
            "indexing" => Ok(Self::Indexing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown FileStatus: {other}")),
        }
    }
}

/// An uploaded file owned by a user. Only `completed` files may be attached
/// to a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub owner_id: String,
    /// Object-store key; opaque to this system.
    pub key: String,
    pub name: String,
    pub size: i64,
    pub status: FileStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// --- Upload sessions ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadStatus::Pending => write!(f, "pending"),
            UploadStatus::Uploading => write!(f, "uploading"),
            UploadStatus::Completed => write!(f, "completed"),
            UploadStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPart {
    pub part_number: i32,
    pub etag: String,
    pub size: i64,
}

/// Multipart upload state mirrored by the upload-session actor.
/// Invariant: `uploaded_parts` equals the number of recorded parts, and
/// `status == Completed` only when every part has been acked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub id: String,
    pub owner_id: String,
    pub file_key: String,
    pub upload_id: String,
    pub filename: String,
    pub file_size: i64,
    pub total_parts: i32,
    pub uploaded_parts: i32,
    pub status: UploadStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// --- Campaigns ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub description: String,
    /// Logical folder scoping AI search, `campaigns/<id>/`.
    pub rag_base_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn rag_base_path_for(campaign_id: &str) -> String {
        format!("campaigns/{campaign_id}/")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractionStatus::Pending => write!(f, "pending"),
            ExtractionStatus::Running => write!(f, "running"),
            ExtractionStatus::Completed => write!(f, "completed"),
            ExtractionStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ExtractionStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown ExtractionStatus: {other}")),
        }
    }
}

/// A file attached to a campaign. Unique by `(campaign_id, file_key)` so the
/// attach operation is idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignResource {
    pub id: String,
    pub campaign_id: String,
    pub file_key: String,
    pub file_name: String,
    pub status: ExtractionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// --- Shards ---

/// One structured RPG primitive extracted from a source document.
/// Immutable after creation; later extractions supersede with new shards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shard {
    pub id: String,
    pub campaign_id: String,
    pub resource_id: String,
    pub shard_type: ContentType,
    /// Canonical JSON for the primitive.
    pub content: serde_json::Value,
    pub metadata: ShardMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardMetadata {
    pub campaign_id: String,
    pub resource_id: String,
    pub resource_name: String,
    pub entity_type: ContentType,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
}

// --- Entities and relationships ---

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EntityMetadata {
    #[serde(default)]
    pub shard_status: ShardStatus,
    #[serde(default)]
    pub ignored: bool,
    #[serde(default)]
    pub rejected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance_override: Option<ImportanceOverride>,
    /// Derived; written back by the importance pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance_score: Option<f64>,
}

impl EntityMetadata {
    /// Whether graph loads must exclude this entity.
    pub fn is_excluded(&self) -> bool {
        self.ignored || self.rejected || self.shard_status == ShardStatus::Rejected
    }
}

/// A node of a campaign's knowledge graph. `id` is `<campaignId>_<slug>`,
/// which makes tenant scoping structural.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub campaign_id: String,
    pub entity_type: ContentType,
    pub name: String,
    pub content: serde_json::Value,
    pub metadata: EntityMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelationshipMetadata {
    #[serde(default)]
    pub status: ShardStatus,
    #[serde(default)]
    pub ignored: bool,
    #[serde(default)]
    pub rejected: bool,
}

impl RelationshipMetadata {
    pub fn is_excluded(&self, include_staging: bool) -> bool {
        if self.ignored || self.rejected {
            return true;
        }
        !include_staging && self.status == ShardStatus::Staging
    }
}

/// An edge of the knowledge graph. `strength` is clamped to [0, 1] at the
/// projection boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRelationship {
    pub id: String,
    pub campaign_id: String,
    pub from_entity_id: String,
    pub to_entity_id: String,
    pub relationship_type: RelationshipType,
    pub strength: f64,
    pub metadata: RelationshipMetadata,
}

// --- Communities ---

/// A group of entities discovered by community detection. At each level every
/// non-rejected entity belongs to at most one community; the hierarchy forms
/// a forest with level 0 coarsest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Community {
    pub id: String,
    pub campaign_id: String,
    pub level: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_community_id: Option<String>,
    pub entity_ids: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunitySummary {
    pub id: String,
    pub community_id: String,
    pub campaign_id: String,
    pub level: i32,
    pub summary_text: String,
    pub key_entities: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

// --- Importance ---

/// Derived importance for one entity. All three inputs are normalized to
/// [0, 100] before combining.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityImportance {
    pub entity_id: String,
    pub campaign_id: String,
    pub pagerank: f64,
    pub betweenness_centrality: f64,
    pub hierarchy_level: f64,
    pub importance_score: f64,
}

/// `0.4·pagerank + 0.4·betweenness + 0.2·hierarchy`, clamped to [0, 100].
pub fn combined_importance(pagerank: f64, betweenness: f64, hierarchy: f64) -> f64 {
    (0.4 * pagerank + 0.4 * betweenness + 0.2 * hierarchy).clamp(0.0, 100.0)
}

// --- Changelog ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityChange {
    Modified,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityUpdate {
    pub entity_id: String,
    pub change: EntityChange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipUpdate {
    pub from_entity_id: String,
    pub to_entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_type: Option<RelationshipType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntity {
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<ContentType>,
}

/// The body of one changelog entry: everything a mutation touched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangelogPayload {
    /// UTC epoch milliseconds at which the mutation happened.
    pub timestamp: i64,
    #[serde(default)]
    pub entity_updates: Vec<EntityUpdate>,
    #[serde(default)]
    pub relationship_updates: Vec<RelationshipUpdate>,
    #[serde(default)]
    pub new_entities: Vec<NewEntity>,
}

impl ChangelogPayload {
    /// Every distinct entity id this payload touches.
    pub fn affected_entity_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entity_updates
            .iter()
            .map(|u| u.entity_id.clone())
            .chain(self.new_entities.iter().map(|n| n.entity_id.clone()))
            .chain(self.relationship_updates.iter().flat_map(|r| {
                [r.from_entity_id.clone(), r.to_entity_id.clone()]
            }))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Append-only record of a world-state mutation with its computed impact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub id: String,
    pub campaign_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: ChangelogPayload,
    pub impact_score: f64,
    pub applied_to_graph: bool,
}

// --- Rebuilds ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildType {
    Full,
    Partial,
}

impl std::fmt::Display for RebuildType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RebuildType::Full => write!(f, "full"),
            RebuildType::Partial => write!(f, "partial"),
        }
    }
}

impl std::str::FromStr for RebuildType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "partial" => Ok(Self::Partial),
            other => Err(format!("unknown RebuildType: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildState {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RebuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RebuildState::Pending => write!(f, "pending"),
            RebuildState::InProgress => write!(f, "in_progress"),
            RebuildState::Completed => write!(f, "completed"),
            RebuildState::Failed => write!(f, "failed"),
            RebuildState::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for RebuildState {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown RebuildState: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildStatus {
    pub id: String,
    pub campaign_id: String,
    pub rebuild_type: RebuildType,
    pub status: RebuildState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Per-rebuild telemetry persisted on completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildTelemetry {
    pub rebuild_id: String,
    pub campaign_id: String,
    pub duration_ms: i64,
    pub community_count: i64,
    pub entity_count: i64,
    /// Seconds since the previous completed rebuild for this campaign, if any.
    pub secs_since_last: Option<i64>,
    pub created_at: DateTime<Utc>,
}

// --- Message history ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub user_id: String,
    pub campaign_id: String,
    /// "user" or "assistant".
    pub role: String,
    pub content: String,
    /// Which agent the router picked, for assistant messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

// --- Duck-typed resource reference normalization ---

/// The canonical shape of a "resource" reference arriving at the HTTP
/// boundary. Callers historically sent the file key under any of
/// `file_key` / `fileKey` / `resource_id` / `id`; this normalizes once and
/// refuses ambiguous inputs so nothing downstream branches on field variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub file_key: String,
    pub name: Option<String>,
}

impl ResourceRef {
    const KEY_FIELDS: [&'static str; 4] = ["file_key", "fileKey", "resource_id", "id"];

    pub fn from_value(value: &serde_json::Value) -> Result<Self, LoreforgeError> {
        let obj = value.as_object().ok_or_else(|| {
            LoreforgeError::Validation("resource reference must be a JSON object".to_string())
        })?;

        let mut found: Vec<(&str, String)> = Vec::new();
        for field in Self::KEY_FIELDS {
            if let Some(v) = obj.get(field) {
                let s = v.as_str().ok_or_else(|| {
                    LoreforgeError::Validation(format!("{field} must be a string"))
                })?;
                if s.is_empty() {
                    return Err(LoreforgeError::Validation(format!("{field} is empty")));
                }
                found.push((field, s.to_string()));
            }
        }

        let mut distinct: Vec<&String> = found.iter().map(|(_, v)| v).collect();
        distinct.sort();
        distinct.dedup();

        match (found.len(), distinct.len()) {
            (0, _) => Err(LoreforgeError::Validation(
                "resource reference is missing a file key (expected one of file_key, fileKey, resource_id, id)".to_string(),
            )),
            (_, 1) => Ok(Self {
                file_key: found[0].1.clone(),
                name: obj.get("name").and_then(|v| v.as_str()).map(str::to_string),
            }),
            _ => Err(LoreforgeError::Validation(format!(
                "ambiguous resource reference: {} carry different values",
                found
                    .iter()
                    .map(|(f, _)| *f)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn combined_importance_clamps() {
        assert_eq!(combined_importance(100.0, 100.0, 100.0), 100.0);
        assert_eq!(combined_importance(0.0, 0.0, 0.0), 0.0);
        let mid = combined_importance(50.0, 50.0, 50.0);
        assert!((mid - 50.0).abs() < 1e-9);
    }

    #[test]
    fn excluded_entity_metadata() {
        let mut m = EntityMetadata::default();
        assert!(!m.is_excluded());
        m.shard_status = ShardStatus::Rejected;
        assert!(m.is_excluded());
        m = EntityMetadata {
            ignored: true,
            ..Default::default()
        };
        assert!(m.is_excluded());
    }

    #[test]
    fn staging_relationship_excluded_only_when_asked() {
        let m = RelationshipMetadata::default();
        assert!(!m.is_excluded(true));
        assert!(m.is_excluded(false));
    }

    #[test]
    fn affected_ids_deduplicate_across_sections() {
        let payload = ChangelogPayload {
            timestamp: 0,
            entity_updates: vec![EntityUpdate {
                entity_id: "c1_a".into(),
                change: EntityChange::Modified,
                detail: None,
            }],
            relationship_updates: vec![RelationshipUpdate {
                from_entity_id: "c1_a".into(),
                to_entity_id: "c1_b".into(),
                relationship_type: None,
                detail: None,
            }],
            new_entities: vec![NewEntity {
                entity_id: "c1_b".into(),
                name: None,
                entity_type: None,
            }],
        };
        assert_eq!(payload.affected_entity_ids(), vec!["c1_a", "c1_b"]);
    }

    #[test]
    fn resource_ref_accepts_any_single_variant() {
        for field in ["file_key", "fileKey", "resource_id", "id"] {
            let v = json!({ field: "f1", "name": "tome.pdf" });
            let r = ResourceRef::from_value(&v).unwrap();
            assert_eq!(r.file_key, "f1");
            assert_eq!(r.name.as_deref(), Some("tome.pdf"));
        }
    }

    #[test]
    fn resource_ref_allows_agreeing_duplicates() {
        let v = json!({ "file_key": "f1", "id": "f1" });
        assert_eq!(ResourceRef::from_value(&v).unwrap().file_key, "f1");
    }

    #[test]
    fn resource_ref_refuses_conflicts_and_absence() {
        let conflicting = json!({ "file_key": "f1", "id": "f2" });
        assert!(matches!(
            ResourceRef::from_value(&conflicting),
            Err(LoreforgeError::Validation(_))
        ));
        let missing = json!({ "name": "tome.pdf" });
        assert!(matches!(
            ResourceRef::from_value(&missing),
            Err(LoreforgeError::Validation(_))
        ));
    }
}
