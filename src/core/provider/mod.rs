pub mod contract;
pub mod discovery;
pub mod index;
pub mod json_path;
pub mod memo;
pub mod mirror;
pub mod official;
pub mod pattern;
pub mod probe;
pub mod template;

pub use contract::{VersionProvider, DEFAULT_MIRROR_PRIORITY, OFFICIAL_PRIORITY};
pub use discovery::{DiscoveryConfig, StaticVersions, VersionDiscovery};
pub use index::{IndexConfig, IndexProvider, IndexShape};
pub use json_path::JsonPath;
pub use mirror::MirrorProfile;
pub use official::{AccessTokenSource, OfficialProvider, StaticToken, OFFICIAL_SOURCE_ID};
pub use pattern::{PatternConfig, PatternProvider};
pub use probe::SpeedTestConfig;
pub use template::TokenRemaps;
