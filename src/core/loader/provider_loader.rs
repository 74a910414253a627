use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::descriptor::{ProviderDescriptor, DESCRIPTOR_SUFFIX};
use crate::core::error::{ResolverError, ResolverResult};
use crate::core::http::HttpTransport;
use crate::core::provider::VersionProvider;

/// Builds the mirror set from `*.mirror.json` files in one directory.
pub struct ProviderLoader {
    /// Directory scanned for descriptors.
    dir: PathBuf,
    transport: Arc<dyn HttpTransport>,
    /// Written to `dir` when it has no descriptors at all.
    seed: Vec<ProviderDescriptor>,
}

impl ProviderLoader {
    pub fn new(dir: PathBuf, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            dir,
            transport,
            seed: Vec::new(),
        }
    }

    pub fn with_seed(mut self, seed: Vec<ProviderDescriptor>) -> Self {
        self.seed = seed;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load, validate and instantiate every enabled descriptor, sorted by
    /// ascending priority. Bad descriptors are skipped with a warning.
    pub async fn load(&self) -> ResolverResult<Vec<Arc<dyn VersionProvider>>> {
        self.seed_if_empty().await?;

        let mut providers: Vec<Arc<dyn VersionProvider>> = Vec::new();
        let mut seen_ids = HashSet::new();

        for (path, descriptor) in self.read_descriptors().await? {
            if !descriptor.enabled {
                debug!("Skipping disabled mirror '{}' ({:?})", descriptor.id, path);
                continue;
            }
            if !seen_ids.insert(descriptor.id.clone()) {
                // Both stay loaded; which one wins a tie is unspecified.
                warn!(
                    "Duplicate mirror id '{}' in {:?}, precedence is undefined",
                    descriptor.id, path
                );
            }

            match descriptor.build(self.transport.clone()) {
                Ok(provider) => {
                    debug!(
                        "Loaded {} mirror '{}' (priority {})",
                        descriptor.source_kind(),
                        descriptor.id,
                        descriptor.priority
                    );
                    providers.push(provider);
                }
                Err(e) => warn!("Skipping mirror descriptor {:?}: {}", path, e),
            }
        }

        providers.sort_by_key(|p| p.priority());
        info!("Loaded {} mirror providers from {:?}", providers.len(), self.dir);
        Ok(providers)
    }

    /// Parse every descriptor file, in file-name order. Malformed files are
    /// logged and left out.
    pub async fn read_descriptors(&self) -> ResolverResult<Vec<(PathBuf, ProviderDescriptor)>> {
        let mut descriptors = Vec::new();

        for path in self.descriptor_paths().await? {
            let origin = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            let json = match tokio::fs::read_to_string(&path).await {
                Ok(json) => json,
                Err(e) => {
                    warn!("Cannot read {:?}: {}", path, e);
                    continue;
                }
            };

            let parsed = serde_json::from_str::<ProviderDescriptor>(&json)
                .map_err(ResolverError::from)
                .and_then(|d| d.sanitized(&origin));
            match parsed {
                Ok(descriptor) => descriptors.push((path, descriptor)),
                Err(e) => warn!("Invalid mirror descriptor {:?}: {}", path, e),
            }
        }

        Ok(descriptors)
    }

    async fn descriptor_paths(&self) -> ResolverResult<Vec<PathBuf>> {
        let mut paths = Vec::new();

        if !self.dir.exists() {
            return Ok(paths);
        }

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| ResolverError::Io {
                path: self.dir.clone(),
                source: e,
            })?;

        while let Some(entry) = entries.next_entry().await.map_err(|e| ResolverError::Io {
            path: self.dir.clone(),
            source: e,
        })? {
            let path = entry.path();
            let is_descriptor = path
                .file_name()
                .map(|n| n.to_string_lossy().ends_with(DESCRIPTOR_SUFFIX))
                .unwrap_or(false);
            if is_descriptor && path.is_file() {
                paths.push(path);
            }
        }

        paths.sort();
        Ok(paths)
    }

    async fn seed_if_empty(&self) -> ResolverResult<()> {
        if self.seed.is_empty() || !self.descriptor_paths().await?.is_empty() {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ResolverError::Io {
                path: self.dir.clone(),
                source: e,
            })?;

        for descriptor in &self.seed {
            let path = self.dir.join(descriptor.file_name());
            let json = serde_json::to_string_pretty(descriptor)?;
            tokio::fs::write(&path, json)
                .await
                .map_err(|e| ResolverError::Io { path, source: e })?;
        }

        info!(
            "Seeded {} default mirror descriptors into {:?}",
            self.seed.len(),
            self.dir
        );
        Ok(())
    }
}
