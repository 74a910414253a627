pub mod merge;
pub mod orchestrator;
pub mod speed;

pub use merge::{find_chain, merge_versions, MergedVersion};
pub use orchestrator::{CacheTtl, ResolutionOrchestrator, DEFAULT_VERSION_TTL};
pub use speed::SpeedSelector;
