use serde::{Deserialize, Serialize};

/// The closed set of structured-content types. AI search responses are keyed
/// by exactly these names; anything else is discarded at the parse boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Monster,
    Npc,
    Spell,
    Item,
    Trap,
    Hazard,
    Condition,
    Vehicle,
    EnvEffect,
    Hook,
    PlotLine,
    Quest,
    Scene,
    Location,
    Lair,
    Faction,
    Deity,
    Background,
    Feat,
    Subclass,
    Character,
    CharacterSheet,
    Rule,
    Downtime,
    Table,
    EncounterTable,
    TreasureTable,
    Map,
    Handout,
    Puzzle,
    Timeline,
    Travel,
    /// Escape hatch for structured content that fits no other type.
    Custom,
}

impl ContentType {
    pub const ALL: [ContentType; 33] = [
        ContentType::Monster,
        ContentType::Npc,
        ContentType::Spell,
        ContentType::Item,
        ContentType::Trap,
        ContentType::Hazard,
        ContentType::Condition,
        ContentType::Vehicle,
        ContentType::EnvEffect,
        ContentType::Hook,
        ContentType::PlotLine,
        ContentType::Quest,
        ContentType::Scene,
        ContentType::Location,
        ContentType::Lair,
        ContentType::Faction,
        ContentType::Deity,
        ContentType::Background,
        ContentType::Feat,
        ContentType::Subclass,
        ContentType::Character,
        ContentType::CharacterSheet,
        ContentType::Rule,
        ContentType::Downtime,
        ContentType::Table,
        ContentType::EncounterTable,
        ContentType::TreasureTable,
        ContentType::Map,
        ContentType::Handout,
        ContentType::Puzzle,
        ContentType::Timeline,
        ContentType::Travel,
        ContentType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Monster => "monster",
            ContentType::Npc => "npc",
            ContentType::Spell => "spell",
            ContentType::Item => "item",
            ContentType::Trap => "trap",
            ContentType::Hazard => "hazard",
            ContentType::Condition => "condition",
            ContentType::Vehicle => "vehicle",
            ContentType::EnvEffect => "env_effect",
            ContentType::Hook => "hook",
            ContentType::PlotLine => "plot_line",
            ContentType::Quest => "quest",
            ContentType::Scene => "scene",
            ContentType::Location => "location",
            ContentType::Lair => "lair",
            ContentType::Faction => "faction",
            ContentType::Deity => "deity",
            ContentType::Background => "background",
            ContentType::Feat => "feat",
            ContentType::Subclass => "subclass",
            ContentType::Character => "character",
            ContentType::CharacterSheet => "character_sheet",
            ContentType::Rule => "rule",
            ContentType::Downtime => "downtime",
            ContentType::Table => "table",
            ContentType::EncounterTable => "encounter_table",
            ContentType::TreasureTable => "treasure_table",
            ContentType::Map => "map",
            ContentType::Handout => "handout",
            ContentType::Puzzle => "puzzle",
            ContentType::Timeline => "timeline",
            ContentType::Travel => "travel",
            ContentType::Custom => "custom",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ContentType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ContentType::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown ContentType: {s}"))
    }
}

/// The closed relationship vocabulary, grouped by kind. Unknown incoming
/// types normalize to `RelatedTo` rather than being rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    // family
    ParentOf,
    ChildOf,
    SiblingOf,
    MarriedTo,
    RelatedToByBlood,
    // social
    AlliedWith,
    EnemyOf,
    RivalOf,
    MentorOf,
    FriendOf,
    // organizational
    MemberOf,
    LeaderOf,
    RuledBy,
    // spatial
    LocatedIn,
    Contains,
    Borders,
    // ownership
    Owns,
    OwnedBy,
    // narrative
    RelatedTo,
    AppearsIn,
    References,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::ParentOf => "parent_of",
            RelationshipType::ChildOf => "child_of",
            RelationshipType::SiblingOf => "sibling_of",
            RelationshipType::MarriedTo => "married_to",
            RelationshipType::RelatedToByBlood => "related_to_by_blood",
            RelationshipType::AlliedWith => "allied_with",
            RelationshipType::EnemyOf => "enemy_of",
            RelationshipType::RivalOf => "rival_of",
            RelationshipType::MentorOf => "mentor_of",
            RelationshipType::FriendOf => "friend_of",
            RelationshipType::MemberOf => "member_of",
            RelationshipType::LeaderOf => "leader_of",
            RelationshipType::RuledBy => "ruled_by",
            RelationshipType::LocatedIn => "located_in",
            RelationshipType::Contains => "contains",
            RelationshipType::Borders => "borders",
            RelationshipType::Owns => "owns",
            RelationshipType::OwnedBy => "owned_by",
            RelationshipType::RelatedTo => "related_to",
            RelationshipType::AppearsIn => "appears_in",
            RelationshipType::References => "references",
        }
    }

    /// Parse with the contract's fallback: unknown types become `RelatedTo`.
    pub fn parse_lenient(s: &str) -> Self {
        s.parse().unwrap_or(RelationshipType::RelatedTo)
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RelationshipType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let all = [
            RelationshipType::ParentOf,
            RelationshipType::ChildOf,
            RelationshipType::SiblingOf,
            RelationshipType::MarriedTo,
            RelationshipType::RelatedToByBlood,
            RelationshipType::AlliedWith,
            RelationshipType::EnemyOf,
            RelationshipType::RivalOf,
            RelationshipType::MentorOf,
            RelationshipType::FriendOf,
            RelationshipType::MemberOf,
            RelationshipType::LeaderOf,
            RelationshipType::RuledBy,
            RelationshipType::LocatedIn,
            RelationshipType::Contains,
            RelationshipType::Borders,
            RelationshipType::Owns,
            RelationshipType::OwnedBy,
            RelationshipType::RelatedTo,
            RelationshipType::AppearsIn,
            RelationshipType::References,
        ];
        all.iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unknown RelationshipType: {s}"))
    }
}

/// Review state attached to extracted entities and relationships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    #[default]
    Staging,
    Accepted,
    Rejected,
}

impl std::fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShardStatus::Staging => write!(f, "staging"),
            ShardStatus::Accepted => write!(f, "accepted"),
            ShardStatus::Rejected => write!(f, "rejected"),
        }
    }
}

impl std::str::FromStr for ShardStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "staging" => Ok(Self::Staging),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown ShardStatus: {other}")),
        }
    }
}

/// Manual importance override set by the user in entity metadata. Replaces
/// the computed score on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceOverride {
    Low,
    Normal,
    High,
    Critical,
}

impl ImportanceOverride {
    /// Fixed score the override maps to.
    pub fn score(&self) -> f64 {
        match self {
            ImportanceOverride::Low => 25.0,
            ImportanceOverride::Normal => 50.0,
            ImportanceOverride::High => 75.0,
            ImportanceOverride::Critical => 95.0,
        }
    }
}

impl std::str::FromStr for ImportanceOverride {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown ImportanceOverride: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_roundtrips_through_str() {
        for ct in ContentType::ALL {
            let parsed: ContentType = ct.as_str().parse().unwrap();
            assert_eq!(parsed, ct);
        }
    }

    #[test]
    fn content_type_serde_uses_snake_case() {
        let json = serde_json::to_string(&ContentType::EncounterTable).unwrap();
        assert_eq!(json, "\"encounter_table\"");
    }

    #[test]
    fn unknown_relationship_falls_back_to_related_to() {
        assert_eq!(
            RelationshipType::parse_lenient("nemesis_of"),
            RelationshipType::RelatedTo
        );
        assert_eq!(
            RelationshipType::parse_lenient("married_to"),
            RelationshipType::MarriedTo
        );
    }

    #[test]
    fn override_scores_are_fixed() {
        assert_eq!(ImportanceOverride::Low.score(), 25.0);
        assert_eq!(ImportanceOverride::Critical.score(), 95.0);
    }
}
