//! Per-user notification hub: SSE fan-out with offline queuing, ordered
//! replay on reconnect, ping-based liveness, and dead-connection reaping.
//!
//! One tokio task per user owns all subscriber state; a cloneable handle
//! sends it commands. Because the task processes commands serially, writes to
//! any one subscriber are serialized and the replay ordering
//! (queued → connected → live) needs no locks.

pub mod actor;
pub mod registry;
pub mod writer;

pub use actor::{HubHandle, QUEUE_PREFIX, QUEUE_TTL};
pub use registry::HubRegistry;
pub use writer::{ChannelWriter, StreamEvent, StreamWriter, WriteError};
