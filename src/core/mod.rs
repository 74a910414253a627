// ─── VersionSource Core ───
// Resolves game builds across one official source and any number of
// community mirrors.
//
// Architecture:
//   core/
//     version/    Branch, platform and cache entry models
//     provider/   Provider contract + pattern, index and official sources
//     loader/     `*.mirror.json` descriptors → provider instances
//     cache/      Per-platform version/patch documents + repositories
//     resolver/   Merge, fetch orchestration, mirror speed selection
//     state/      Settings and wiring

pub mod cache;
pub mod error;
pub mod http;
pub mod loader;
pub mod provider;
pub mod resolver;
pub mod state;
pub mod version;
