pub mod core;

use tracing_subscriber::EnvFilter;

pub use crate::core::error::{ResolverError, ResolverResult};
pub use crate::core::resolver::ResolutionOrchestrator;
pub use crate::core::state::{ResolverSettings, ResolverState};
pub use crate::core::version::{Branch, Platform};

/// Install structured logging. Honors `RUST_LOG`; safe to call twice.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,versionsource_lib=debug")),
        )
        .try_init();

    tracing::debug!("VersionSource tracing initialized");
}
