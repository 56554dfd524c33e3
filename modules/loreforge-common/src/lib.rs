pub mod config;
pub mod error;
pub mod kv;
pub mod notifications;
pub mod types;
pub mod vocab;

pub use config::Config;
pub use error::LoreforgeError;
pub use kv::{ActorKv, MemoryKv};
pub use notifications::*;
pub use types::*;
pub use vocab::*;

/// Normalize an entity name into the slug half of an entity id: lowercase,
/// every non-alphanumeric rune becomes `_`, runs collapsed, ends trimmed.
///
/// ```
/// assert_eq!(loreforge_common::slugify_entity("Lord Soth"), "lord_soth");
/// assert_eq!(loreforge_common::slugify_entity("  The  Black--Rose  "), "the_black_rose");
/// assert_eq!(loreforge_common::slugify_entity("Strahd von Zarovich!!!"), "strahd_von_zarovich");
/// ```
pub fn slugify_entity(name: &str) -> String {
    let lowered = name.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<&str>>().join("_")
}

/// Build a tenant-scoped entity id: `<campaignId>_<slug>`.
/// If `name_or_id` already carries the campaign prefix it is returned as-is,
/// so ids can round-trip through changelog payloads safely.
pub fn entity_id(campaign_id: &str, name_or_id: &str) -> String {
    let prefix = format!("{campaign_id}_");
    if name_or_id.starts_with(&prefix) {
        return name_or_id.to_string();
    }
    format!("{campaign_id}_{}", slugify_entity(name_or_id))
}

/// Current wall-clock time as UTC milliseconds since epoch.
pub fn epoch_ms_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_runs() {
        assert_eq!(slugify_entity("a - b -- c"), "a_b_c");
    }

    #[test]
    fn slugify_trims_edges() {
        assert_eq!(slugify_entity("--edge--"), "edge");
    }

    #[test]
    fn slugify_keeps_unicode_alphanumerics() {
        assert_eq!(slugify_entity("Château d'Ambreville"), "château_d_ambreville");
    }

    #[test]
    fn entity_id_prefixes_once() {
        let id = entity_id("c1", "Lord Soth");
        assert_eq!(id, "c1_lord_soth");
        assert_eq!(entity_id("c1", &id), id);
    }
}
