pub mod branch;
pub mod entry;
pub mod platform;

pub use branch::Branch;
pub use entry::{
    CachedVersionEntry, PatchStep, SourceKind, SpeedProbeResult, VersionListing,
};
pub use platform::{Arch, Os, Platform};
