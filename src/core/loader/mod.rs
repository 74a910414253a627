pub mod descriptor;
pub mod provider_loader;

pub use descriptor::{CacheTtlConfig, ProviderDescriptor, SourceConfig, DESCRIPTOR_SUFFIX};
pub use provider_loader::ProviderLoader;
