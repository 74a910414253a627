// ─── Merge ───
// Combining per-source buckets into one answer. Mirrors are layered from
// least to most preferred, then the official bucket is laid on top, so for
// any version number the official source always wins.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::core::cache::{PatchesCacheSnapshot, SourceBucket, VersionsCacheSnapshot};
use crate::core::version::{Branch, CachedVersionEntry, PatchStep, SourceKind, VersionListing};

/// A version together with the source that won it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedVersion {
    pub entry: CachedVersionEntry,
    pub source: SourceKind,
    pub source_id: String,
}

/// Merge `branch` across sources, newest first, one entry per version.
///
/// `mirror_ids` lists loaded mirrors in ascending priority (most preferred
/// first); buckets of other ids are ignored.
pub fn merge_versions(
    snapshot: &VersionsCacheSnapshot,
    branch: Branch,
    mirror_ids: &[&str],
    official_id: Option<&str>,
) -> Vec<MergedVersion> {
    let mut merged: BTreeMap<u32, MergedVersion> = BTreeMap::new();

    for id in mirror_ids.iter().rev() {
        if let Some(entries) = snapshot.bucket(SourceBucket::Mirror(id), branch) {
            for entry in entries {
                merged.insert(
                    entry.version,
                    MergedVersion {
                        entry: entry.clone(),
                        source: SourceKind::Mirror,
                        source_id: id.to_string(),
                    },
                );
            }
        }
    }

    if let Some(official_id) = official_id {
        if let Some(entries) = snapshot.bucket(SourceBucket::Official, branch) {
            for entry in entries {
                merged.insert(
                    entry.version,
                    MergedVersion {
                        entry: entry.clone(),
                        source: SourceKind::Official,
                        source_id: official_id.to_string(),
                    },
                );
            }
        }
    }

    merged.into_values().rev().collect()
}

pub fn to_listings(merged: &[MergedVersion]) -> Vec<VersionListing> {
    merged
        .iter()
        .enumerate()
        .map(|(i, m)| VersionListing {
            version: m.entry.version,
            source: m.source,
            source_id: m.source_id.clone(),
            is_latest: i == 0,
        })
        .collect()
}

/// Patch steps of `branch` in preference order: official first, then mirrors
/// as listed. The first source to offer an edge owns it.
pub fn preferred_steps(
    snapshot: &PatchesCacheSnapshot,
    branch: Branch,
    mirror_ids: &[&str],
    include_official: bool,
) -> Vec<PatchStep> {
    let mut edges: BTreeMap<(u32, u32), PatchStep> = BTreeMap::new();
    let official = include_official
        .then(|| snapshot.bucket(SourceBucket::Official, branch))
        .flatten();
    let mirrors = mirror_ids
        .iter()
        .filter_map(|id| snapshot.bucket(SourceBucket::Mirror(id), branch));

    for steps in official.into_iter().chain(mirrors) {
        for step in steps {
            edges.entry((step.from, step.to)).or_insert_with(|| step.clone());
        }
    }
    edges.into_values().collect()
}

/// Fewest-hop chain `from -> … -> to` over `steps`, if one exists.
pub fn find_chain(steps: &[PatchStep], from: u32, to: u32) -> Option<Vec<PatchStep>> {
    if from == to {
        return Some(Vec::new());
    }

    let mut outgoing: HashMap<u32, Vec<&PatchStep>> = HashMap::new();
    for step in steps.iter().filter(|s| s.from < s.to) {
        outgoing.entry(step.from).or_default().push(step);
    }

    let mut came_from: HashMap<u32, &PatchStep> = HashMap::new();
    let mut queue = VecDeque::from([from]);
    while let Some(current) = queue.pop_front() {
        if current == to {
            break;
        }
        for step in outgoing.get(&current).into_iter().flatten() {
            if step.to == from || came_from.contains_key(&step.to) {
                continue;
            }
            came_from.insert(step.to, *step);
            queue.push_back(step.to);
        }
    }

    let mut chain = Vec::new();
    let mut cursor = to;
    while cursor != from {
        let step = came_from.get(&cursor)?;
        chain.push((*step).clone());
        cursor = step.from;
    }
    chain.reverse();
    Some(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::version::Platform;

    fn snapshot_with(buckets: &[(SourceBucket<'_>, &[u32])]) -> VersionsCacheSnapshot {
        let mut snapshot = VersionsCacheSnapshot::new(&Platform::current());
        for (source, versions) in buckets {
            let id = match source {
                SourceBucket::Official => "official",
                SourceBucket::Mirror(id) => *id,
            };
            let entries = versions
                .iter()
                .map(|v| CachedVersionEntry::full(*v, format!("https://{}/{}", id, v)))
                .collect();
            snapshot.set_bucket(*source, Branch::Release, entries);
        }
        snapshot
    }

    #[test]
    fn official_wins_shared_versions() {
        let snapshot = snapshot_with(&[
            (SourceBucket::Mirror("p1"), &[1, 2, 3]),
            (SourceBucket::Official, &[3, 4]),
        ]);

        let merged = merge_versions(&snapshot, Branch::Release, &["p1"], Some("official"));

        let v3 = merged.iter().find(|m| m.entry.version == 3).unwrap();
        assert_eq!(v3.source, SourceKind::Official);
        assert_eq!(v3.entry.url, "https://official/3");
    }

    #[test]
    fn merged_list_is_strictly_descending() {
        let snapshot = snapshot_with(&[
            (SourceBucket::Mirror("a"), &[5, 1, 3]),
            (SourceBucket::Mirror("b"), &[3, 4, 1]),
            (SourceBucket::Official, &[2, 5]),
        ]);

        let versions: Vec<u32> = merge_versions(&snapshot, Branch::Release, &["a", "b"], Some("official"))
            .iter()
            .map(|m| m.entry.version)
            .collect();

        assert_eq!(versions, vec![5, 4, 3, 2, 1]);
        assert!(versions.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn preferred_mirror_wins_among_mirrors() {
        let snapshot = snapshot_with(&[
            (SourceBucket::Mirror("fast"), &[7]),
            (SourceBucket::Mirror("slow"), &[7]),
        ]);

        let merged = merge_versions(&snapshot, Branch::Release, &["fast", "slow"], None);

        assert_eq!(merged[0].source_id, "fast");
    }

    #[test]
    fn unloaded_mirrors_and_official_are_ignored() {
        let snapshot = snapshot_with(&[
            (SourceBucket::Mirror("removed"), &[9]),
            (SourceBucket::Official, &[8]),
        ]);

        assert!(merge_versions(&snapshot, Branch::Release, &[], None).is_empty());
    }

    #[test]
    fn listings_flag_only_the_newest() {
        let snapshot = snapshot_with(&[(SourceBucket::Mirror("m"), &[1, 2])]);
        let listings = to_listings(&merge_versions(&snapshot, Branch::Release, &["m"], None));

        assert!(listings[0].is_latest);
        assert_eq!(listings[0].version, 2);
        assert!(!listings[1].is_latest);
    }

    #[test]
    fn chain_uses_fewest_hops() {
        let steps = vec![
            PatchStep::new(1, 2, "a"),
            PatchStep::new(2, 3, "b"),
            PatchStep::new(3, 4, "c"),
            PatchStep::new(2, 4, "skip"),
        ];

        let chain = find_chain(&steps, 1, 4).unwrap();
        let urls: Vec<&str> = chain.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, vec!["a", "skip"]);

        assert!(find_chain(&steps, 4, 1).is_none());
        assert_eq!(find_chain(&steps, 3, 3), Some(vec![]));
    }

    #[test]
    fn official_patch_edges_take_precedence() {
        let mut snapshot = PatchesCacheSnapshot::new(&Platform::current());
        snapshot.set_bucket(SourceBucket::Mirror("m"), Branch::Release, vec![PatchStep::new(1, 2, "mirror")]);
        snapshot.set_bucket(SourceBucket::Official, Branch::Release, vec![PatchStep::new(1, 2, "official")]);

        let steps = preferred_steps(&snapshot, Branch::Release, &["m"], true);
        assert_eq!(steps, vec![PatchStep::new(1, 2, "official")]);

        let steps = preferred_steps(&snapshot, Branch::Release, &["m"], false);
        assert_eq!(steps, vec![PatchStep::new(1, 2, "mirror")]);
    }
}
