// ─── Cache Snapshots ───
// Persisted per-platform documents. Buckets are keyed by source and branch,
// and every branch carries its own fetch timestamp so branches expire
// independently. Unknown fields survive a load/save cycle.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::version::{Branch, CachedVersionEntry, PatchStep, Platform};

/// Which bucket of a snapshot an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceBucket<'a> {
    Official,
    Mirror(&'a str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(bound(
    serialize = "T: Serialize",
    deserialize = "T: Deserialize<'de>"
))]
pub struct CacheSnapshot<T> {
    #[serde(default)]
    pub fetched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
    /// Canonical branch string -> last successful fetch.
    #[serde(default)]
    pub branch_fetched_at: BTreeMap<String, DateTime<Utc>>,
    /// Branch -> items.
    #[serde(default)]
    pub official: BTreeMap<String, Vec<T>>,
    /// Mirror id -> branch -> items.
    #[serde(default)]
    pub mirrors: BTreeMap<String, BTreeMap<String, Vec<T>>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

pub type VersionsCacheSnapshot = CacheSnapshot<CachedVersionEntry>;
pub type PatchesCacheSnapshot = CacheSnapshot<PatchStep>;

impl<T> CacheSnapshot<T> {
    pub fn new(platform: &Platform) -> Self {
        Self {
            fetched_at: None,
            os: platform.os.as_str().to_string(),
            arch: platform.arch.as_str().to_string(),
            branch_fetched_at: BTreeMap::new(),
            official: BTreeMap::new(),
            mirrors: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn matches(&self, platform: &Platform) -> bool {
        self.os == platform.os.as_str() && self.arch == platform.arch.as_str()
    }

    pub fn bucket(&self, source: SourceBucket<'_>, branch: Branch) -> Option<&Vec<T>> {
        match source {
            SourceBucket::Official => self.official.get(branch.as_str()),
            SourceBucket::Mirror(id) => self.mirrors.get(id)?.get(branch.as_str()),
        }
    }

    pub fn set_bucket(&mut self, source: SourceBucket<'_>, branch: Branch, items: Vec<T>) {
        let key = branch.as_str().to_string();
        match source {
            SourceBucket::Official => {
                self.official.insert(key, items);
            }
            SourceBucket::Mirror(id) => {
                self.mirrors
                    .entry(id.to_string())
                    .or_default()
                    .insert(key, items);
            }
        }
    }

    pub fn branch_fetched_at(&self, branch: Branch) -> Option<DateTime<Utc>> {
        self.branch_fetched_at.get(branch.as_str()).copied()
    }

    pub fn stamp(&mut self, branch: Branch, now: DateTime<Utc>) {
        self.branch_fetched_at
            .insert(branch.as_str().to_string(), now);
        self.fetched_at = Some(now);
    }

    /// Fetched within `ttl` of `now`.
    pub fn is_fresh(&self, branch: Branch, ttl: Duration, now: DateTime<Utc>) -> bool {
        let Some(fetched_at) = self.branch_fetched_at(branch) else {
            return false;
        };
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now.signed_duration_since(fetched_at) < ttl && fetched_at <= now,
            Err(_) => true,
        }
    }

    /// Drop mirror buckets whose id is not in `known`.
    pub fn retain_mirrors(&mut self, known: &[&str]) {
        self.mirrors.retain(|id, _| known.contains(&id.as_str()));
    }

    /// Remove items matching `predicate` from `branch`, in one source or all.
    /// Returns how many were removed.
    pub fn remove_where(
        &mut self,
        branch: Branch,
        source_id: Option<&str>,
        official_id: &str,
        predicate: impl Fn(&T) -> bool,
    ) -> usize {
        let mut removed = 0;
        let mut prune = |items: &mut Vec<T>| {
            let before = items.len();
            items.retain(|item| !predicate(item));
            removed += before - items.len();
        };

        let include_official = source_id.map(|id| id == official_id).unwrap_or(true);
        if include_official {
            if let Some(items) = self.official.get_mut(branch.as_str()) {
                prune(items);
            }
        }
        for (id, branches) in self.mirrors.iter_mut() {
            if source_id.map(|wanted| wanted == id).unwrap_or(true) {
                if let Some(items) = branches.get_mut(branch.as_str()) {
                    prune(items);
                }
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::version::{Arch, Os};

    fn linux() -> Platform {
        Platform::new(Os::Linux, Arch::Amd64)
    }

    #[test]
    fn branches_expire_independently() {
        let mut snapshot = VersionsCacheSnapshot::new(&linux());
        let now = Utc::now();
        snapshot.stamp(Branch::Release, now - chrono::Duration::minutes(20));
        snapshot.stamp(Branch::PreRelease, now - chrono::Duration::minutes(5));

        let ttl = Duration::from_secs(15 * 60);
        assert!(!snapshot.is_fresh(Branch::Release, ttl, now));
        assert!(snapshot.is_fresh(Branch::PreRelease, ttl, now));
    }

    #[test]
    fn unknown_fields_survive_round_trip() {
        let raw = serde_json::json!({
            "os": "linux",
            "arch": "amd64",
            "branchFetchedAt": {},
            "official": {"nightly": [{"version": 1, "url": "u"}]},
            "writtenBy": "newer build"
        });
        let snapshot: VersionsCacheSnapshot = serde_json::from_value(raw).unwrap();
        assert!(snapshot.matches(&linux()));
        assert_eq!(snapshot.extra.get("writtenBy"), Some(&serde_json::json!("newer build")));

        let written = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(written["writtenBy"], "newer build");
        assert_eq!(written["official"]["nightly"][0]["version"], 1);
    }

    #[test]
    fn remove_where_targets_one_source_or_all() {
        let mut snapshot = VersionsCacheSnapshot::new(&linux());
        let entries = vec![CachedVersionEntry::full(1, "a"), CachedVersionEntry::full(2, "b")];
        snapshot.set_bucket(SourceBucket::Official, Branch::Release, entries.clone());
        snapshot.set_bucket(SourceBucket::Mirror("m1"), Branch::Release, entries.clone());
        snapshot.set_bucket(SourceBucket::Mirror("m2"), Branch::Release, entries);

        let removed = snapshot.remove_where(Branch::Release, Some("m1"), "official", |e| e.version == 2);
        assert_eq!(removed, 1);
        assert_eq!(snapshot.bucket(SourceBucket::Official, Branch::Release).unwrap().len(), 2);

        let removed = snapshot.remove_where(Branch::Release, None, "official", |e| e.version == 2);
        assert_eq!(removed, 2);
    }

    #[test]
    fn retain_mirrors_prunes_unknown_ids() {
        let mut snapshot = PatchesCacheSnapshot::new(&linux());
        snapshot.set_bucket(SourceBucket::Mirror("gone"), Branch::Release, vec![PatchStep::new(1, 2, "u")]);
        snapshot.set_bucket(SourceBucket::Mirror("kept"), Branch::Release, vec![]);

        snapshot.retain_mirrors(&["kept"]);

        assert_eq!(snapshot.mirrors.keys().collect::<Vec<_>>(), vec!["kept"]);
    }
}
