use std::collections::HashSet;
use std::time::Duration;

use super::probe::SpeedTestConfig;
use super::template::TokenRemaps;
use crate::core::version::Branch;

/// Settings shared by every community mirror, whatever its discovery protocol.
#[derive(Debug, Clone)]
pub struct MirrorProfile {
    pub id: String,
    pub name: String,
    pub priority: i32,
    pub remaps: TokenRemaps,
    pub diff_only_branches: HashSet<Branch>,
    pub speed_test: Option<SpeedTestConfig>,
    /// How long a fetched listing / index document is reused.
    pub index_ttl: Duration,
    pub speed_ttl: Duration,
}

impl MirrorProfile {
    pub fn is_diff_only(&self, branch: Branch) -> bool {
        self.diff_only_branches.contains(&branch)
    }
}

#[cfg(test)]
impl MirrorProfile {
    pub(crate) fn named(id: &str, priority: i32) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            priority,
            remaps: TokenRemaps::default(),
            diff_only_branches: HashSet::new(),
            speed_test: None,
            index_ttl: Duration::from_secs(15 * 60),
            speed_ttl: Duration::from_secs(60 * 60),
        }
    }
}
