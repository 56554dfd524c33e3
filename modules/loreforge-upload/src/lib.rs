//! Per-upload session actor. Tracks multipart upload state, accepts part
//! acks, and finalizes once every part has landed.
//!
//! The in-memory session mirrors two KV entries (`session` and `parts`,
//! persisted separately to keep writes small), so an actor restarted after a
//! crash rehydrates from KV.

pub mod actor;
pub mod registry;

pub use actor::{CreateUploadSession, UploadHandle};
pub use registry::UploadRegistry;
