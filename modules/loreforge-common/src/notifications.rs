use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::epoch_ms_now;

/// The closed notification type vocabulary. `System` carries the suffix of a
/// `system:*` type; everything else is a fixed constant. Clients match on the
/// wire strings, so `Connected` and `DurableObjectReset` keep their hyphenated
/// historical forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NotificationType {
    ShardsGenerated,
    ShardApproved,
    ShardRejected,
    FileUploaded,
    FileUploadFailed,
    IndexingStarted,
    IndexingCompleted,
    IndexingFailed,
    CampaignFileAdded,
    FileStatusUpdated,
    CampaignCreated,
    CampaignDeleted,
    RebuildStarted,
    RebuildProgress,
    RebuildCompleted,
    RebuildFailed,
    RebuildCancelled,
    Success,
    Error,
    Connected,
    DurableObjectReset,
    System(String),
}

impl NotificationType {
    pub fn as_wire(&self) -> String {
        match self {
            NotificationType::ShardsGenerated => "shards_generated".to_string(),
            NotificationType::ShardApproved => "shard_approved".to_string(),
            NotificationType::ShardRejected => "shard_rejected".to_string(),
            NotificationType::FileUploaded => "file_uploaded".to_string(),
            NotificationType::FileUploadFailed => "file_upload_failed".to_string(),
            NotificationType::IndexingStarted => "indexing_started".to_string(),
            NotificationType::IndexingCompleted => "indexing_completed".to_string(),
            NotificationType::IndexingFailed => "indexing_failed".to_string(),
            NotificationType::CampaignFileAdded => "campaign_file_added".to_string(),
            NotificationType::FileStatusUpdated => "file_status_updated".to_string(),
            NotificationType::CampaignCreated => "campaign_created".to_string(),
            NotificationType::CampaignDeleted => "campaign_deleted".to_string(),
            NotificationType::RebuildStarted => "rebuild_started".to_string(),
            NotificationType::RebuildProgress => "rebuild_progress".to_string(),
            NotificationType::RebuildCompleted => "rebuild_completed".to_string(),
            NotificationType::RebuildFailed => "rebuild_failed".to_string(),
            NotificationType::RebuildCancelled => "rebuild_cancelled".to_string(),
            NotificationType::Success => "success".to_string(),
            NotificationType::Error => "error".to_string(),
            NotificationType::Connected => "connected".to_string(),
            NotificationType::DurableObjectReset => "durable-object-reset".to_string(),
            NotificationType::System(suffix) => format!("system:{suffix}"),
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_wire())
    }
}

impl std::str::FromStr for NotificationType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if let Some(suffix) = s.strip_prefix("system:") {
            return Ok(NotificationType::System(suffix.to_string()));
        }
        match s {
            "shards_generated" => Ok(Self::ShardsGenerated),
            "shard_approved" => Ok(Self::ShardApproved),
            "shard_rejected" => Ok(Self::ShardRejected),
            "file_uploaded" => Ok(Self::FileUploaded),
            "file_upload_failed" => Ok(Self::FileUploadFailed),
            "indexing_started" => Ok(Self::IndexingStarted),
            "indexing_completed" => Ok(Self::IndexingCompleted),
            "indexing_failed" => Ok(Self::IndexingFailed),
            "campaign_file_added" => Ok(Self::CampaignFileAdded),
            "file_status_updated" => Ok(Self::FileStatusUpdated),
            "campaign_created" => Ok(Self::CampaignCreated),
            "campaign_deleted" => Ok(Self::CampaignDeleted),
            "rebuild_started" => Ok(Self::RebuildStarted),
            "rebuild_progress" => Ok(Self::RebuildProgress),
            "rebuild_completed" => Ok(Self::RebuildCompleted),
            "rebuild_failed" => Ok(Self::RebuildFailed),
            "rebuild_cancelled" => Ok(Self::RebuildCancelled),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            "connected" => Ok(Self::Connected),
            "durable-object-reset" => Ok(Self::DurableObjectReset),
            other => Err(format!("unknown NotificationType: {other}")),
        }
    }
}

impl TryFrom<String> for NotificationType {
    type Error = String;
    fn try_from(value: String) -> std::result::Result<Self, String> {
        value.parse()
    }
}

impl From<NotificationType> for String {
    fn from(value: NotificationType) -> Self {
        value.as_wire()
    }
}

/// A notification payload as delivered over the SSE stream and stored in the
/// offline queue. `data.hidden = true` suppresses UI rendering but the
/// payload still flows through the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub ntype: NotificationType,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    pub timestamp: i64,
}

impl Notification {
    pub fn new(
        ntype: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            ntype,
            title: title.into(),
            message: message.into(),
            data: serde_json::Value::Null,
            timestamp: epoch_ms_now(),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Hidden diagnostic: delivered to the stream, never rendered in the UI.
    pub fn hidden(mut self) -> Self {
        match &mut self.data {
            serde_json::Value::Object(map) => {
                map.insert("hidden".to_string(), serde_json::Value::Bool(true));
            }
            _ => {
                self.data = serde_json::json!({ "hidden": true });
            }
        }
        self
    }

    pub fn is_hidden(&self) -> bool {
        self.data
            .get("hidden")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Stable `(timestamp, type, data-hash)` tuple clients use to deduplicate
    /// at-least-once deliveries.
    pub fn dedup_key(&self) -> (i64, String, String) {
        let canonical = serde_json::to_string(&self.data).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let hash = hex::encode(hasher.finalize());
        (self.timestamp, self.ntype.as_wire(), hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_roundtrips_through_wire_form() {
        for s in [
            "shards_generated",
            "shard_approved",
            "rebuild_completed",
            "connected",
            "durable-object-reset",
            "system:maintenance",
        ] {
            let t: NotificationType = s.parse().unwrap();
            assert_eq!(t.as_wire(), s);
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!("shards_approved".parse::<NotificationType>().is_err());
    }

    #[test]
    fn serde_uses_wire_strings() {
        let n = Notification::new(NotificationType::FileUploaded, "Uploaded", "done");
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["type"], "file_uploaded");
        assert!(v["timestamp"].is_i64());
    }

    #[test]
    fn hidden_preserves_existing_data_fields() {
        let n = Notification::new(NotificationType::Error, "Parse issue", "bad json")
            .with_data(json!({"detail": "unterminated string"}))
            .hidden();
        assert!(n.is_hidden());
        assert_eq!(n.data["detail"], "unterminated string");
    }

    #[test]
    fn dedup_key_is_stable_and_data_sensitive() {
        let a = Notification {
            ntype: NotificationType::Success,
            title: "t".into(),
            message: "m".into(),
            data: json!({"n": 1}),
            timestamp: 1000,
        };
        let mut b = a.clone();
        assert_eq!(a.dedup_key(), b.dedup_key());
        b.data = json!({"n": 2});
        assert_ne!(a.dedup_key(), b.dedup_key());
    }
}
