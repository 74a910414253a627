use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::snapshot::{PatchesCacheSnapshot, VersionsCacheSnapshot};
use crate::core::error::{ResolverError, ResolverResult};
use crate::core::version::Platform;

/// Storage for the two cache documents of each platform.
///
/// Saves replace the whole document; there are no partial updates.
#[async_trait]
pub trait CacheRepository: Send + Sync {
    async fn load_versions(&self, platform: &Platform) -> ResolverResult<Option<VersionsCacheSnapshot>>;

    async fn save_versions(
        &self,
        platform: &Platform,
        snapshot: &VersionsCacheSnapshot,
    ) -> ResolverResult<()>;

    async fn load_patches(&self, platform: &Platform) -> ResolverResult<Option<PatchesCacheSnapshot>>;

    async fn save_patches(
        &self,
        platform: &Platform,
        snapshot: &PatchesCacheSnapshot,
    ) -> ResolverResult<()>;
}

// ─── File-backed repository ───

/// Stores `versions-<os>-<arch>.json` and `patches-<os>-<arch>.json` in one
/// directory. Writes go to a temp file that is then renamed over the target.
pub struct FileCacheRepository {
    dir: PathBuf,
}

impl FileCacheRepository {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn versions_path(&self, platform: &Platform) -> PathBuf {
        self.dir.join(format!("versions-{}.json", platform.key()))
    }

    pub fn patches_path(&self, platform: &Platform) -> PathBuf {
        self.dir.join(format!("patches-{}.json", platform.key()))
    }
}

/// Missing file -> `None`; corrupt file -> logged, `None`.
async fn read_document<T: DeserializeOwned>(path: &Path) -> ResolverResult<Option<T>> {
    let json = match tokio::fs::read_to_string(path).await {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ResolverError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    match serde_json::from_str(&json) {
        Ok(document) => Ok(Some(document)),
        Err(e) => {
            warn!("Corrupt cache document at {:?}, ignoring: {}", path, e);
            Ok(None)
        }
    }
}

async fn write_document_atomic<T: Serialize>(path: &Path, document: &T) -> ResolverResult<()> {
    let json = serde_json::to_string_pretty(document)?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ResolverError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json)
        .await
        .map_err(|e| ResolverError::Io {
            path: tmp_path.clone(),
            source: e,
        })?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| ResolverError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

    debug!("Wrote cache document {:?}", path);
    Ok(())
}

#[async_trait]
impl CacheRepository for FileCacheRepository {
    async fn load_versions(&self, platform: &Platform) -> ResolverResult<Option<VersionsCacheSnapshot>> {
        read_document(&self.versions_path(platform)).await
    }

    async fn save_versions(
        &self,
        platform: &Platform,
        snapshot: &VersionsCacheSnapshot,
    ) -> ResolverResult<()> {
        write_document_atomic(&self.versions_path(platform), snapshot).await
    }

    async fn load_patches(&self, platform: &Platform) -> ResolverResult<Option<PatchesCacheSnapshot>> {
        read_document(&self.patches_path(platform)).await
    }

    async fn save_patches(
        &self,
        platform: &Platform,
        snapshot: &PatchesCacheSnapshot,
    ) -> ResolverResult<()> {
        write_document_atomic(&self.patches_path(platform), snapshot).await
    }
}

// ─── In-memory repository ───

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DocumentKind {
    Versions,
    Patches,
}

/// Keeps serialized documents in memory. Used in tests and by embedders that
/// do not want a disk cache.
#[derive(Default)]
pub struct MemoryCacheRepository {
    documents: Mutex<HashMap<(DocumentKind, Platform), String>>,
    saves: Mutex<usize>,
}

impl MemoryCacheRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of whole-document saves so far.
    pub async fn save_count(&self) -> usize {
        *self.saves.lock().await
    }

    async fn load<T: DeserializeOwned>(&self, kind: DocumentKind, platform: &Platform) -> ResolverResult<Option<T>> {
        let documents = self.documents.lock().await;
        match documents.get(&(kind, *platform)) {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    async fn save<T: Serialize>(&self, kind: DocumentKind, platform: &Platform, document: &T) -> ResolverResult<()> {
        let json = serde_json::to_string(document)?;
        self.documents.lock().await.insert((kind, *platform), json);
        *self.saves.lock().await += 1;
        Ok(())
    }
}

#[async_trait]
impl CacheRepository for MemoryCacheRepository {
    async fn load_versions(&self, platform: &Platform) -> ResolverResult<Option<VersionsCacheSnapshot>> {
        self.load(DocumentKind::Versions, platform).await
    }

    async fn save_versions(
        &self,
        platform: &Platform,
        snapshot: &VersionsCacheSnapshot,
    ) -> ResolverResult<()> {
        self.save(DocumentKind::Versions, platform, snapshot).await
    }

    async fn load_patches(&self, platform: &Platform) -> ResolverResult<Option<PatchesCacheSnapshot>> {
        self.load(DocumentKind::Patches, platform).await
    }

    async fn save_patches(
        &self,
        platform: &Platform,
        snapshot: &PatchesCacheSnapshot,
    ) -> ResolverResult<()> {
        self.save(DocumentKind::Patches, platform, snapshot).await
    }
}
