//! Graph rebuild orchestration: impact-scored changelog recording, the
//! per-campaign impact accumulator, the rebuild pipeline with retry and
//! dead-lettering, and the read-time overlay reducer.

pub mod accumulator;
pub mod changelog;
pub mod orchestrator;
pub mod overlay;

pub use accumulator::ImpactAccumulator;
pub use changelog::{ChangelogRecorder, ImpactWeights};
pub use orchestrator::{OrchestratorConfig, RebuildOrchestrator, RebuildRequest};
pub use overlay::{reduce_overlay, WorldOverlay};
