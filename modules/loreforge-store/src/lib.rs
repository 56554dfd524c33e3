//! All persistence for the campaign backend: relational stores over Postgres
//! plus the per-actor KV table the actors delegate to.
//!
//! Stores are thin `PgPool` wrappers with runtime-checked queries. Domain
//! types live in `loreforge-common`; rows are mapped by hand at the edges.

pub mod campaigns;
pub mod changelog;
pub mod files;
pub mod graph;
pub mod kv;
pub mod messages;
pub mod migrate;
pub mod rebuilds;

pub use campaigns::{CampaignStore, ResourceStore};
pub use changelog::ChangelogStore;
pub use files::FileStore;
pub use graph::{CommunityStore, EntityStore, ImportanceStore, ShardStore, SummaryStore};
pub use kv::PgActorKv;
pub use messages::MessageStore;
pub use rebuilds::RebuildStore;
