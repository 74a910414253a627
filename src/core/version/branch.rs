// ─── Branch ───
// Canonical branch identifiers. Caller lookups go through `Branch::normalize`;
// persisted data (descriptors, settings) must name a known branch.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

/// Release channel of the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Branch {
    Release,
    PreRelease,
}

impl Branch {
    /// Canonical string, used as cache key and `{branch}` placeholder value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Branch::Release => "release",
            Branch::PreRelease => "pre-release",
        }
    }

    /// Strict parse: known synonyms only.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "release" | "stable" | "live" => Some(Branch::Release),
            "pre-release" | "prerelease" | "pre_release" | "pre" | "beta" => {
                Some(Branch::PreRelease)
            }
            _ => None,
        }
    }

    /// Lenient parse for caller-supplied branch names: anything unrecognized
    /// becomes `Release`.
    pub fn normalize(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_else(|| {
            debug!("Unrecognized branch '{}', defaulting to release", raw);
            Branch::Release
        })
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Branch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Branch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Branch::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown branch '{}'", raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synonyms_fold_to_canonical() {
        assert_eq!(Branch::normalize("prerelease"), Branch::PreRelease);
        assert_eq!(Branch::normalize(" Pre-Release "), Branch::PreRelease);
        assert_eq!(Branch::normalize("pre_release"), Branch::PreRelease);
        assert_eq!(Branch::normalize("RELEASE"), Branch::Release);
    }

    #[test]
    fn unknown_defaults_to_release() {
        assert_eq!(Branch::normalize("nightly"), Branch::Release);
        assert_eq!(Branch::normalize(""), Branch::Release);
    }

    #[test]
    fn serde_uses_canonical_strings() {
        let json = serde_json::to_string(&Branch::PreRelease).unwrap();
        assert_eq!(json, "\"pre-release\"");
        let parsed: Branch = serde_json::from_str("\"prerelease\"").unwrap();
        assert_eq!(parsed, Branch::PreRelease);
    }

    #[test]
    fn deserializing_unknown_branch_fails() {
        assert!(serde_json::from_str::<Branch>("\"nightly\"").is_err());
        assert_eq!(Branch::parse("nightly"), None);
        assert_eq!(Branch::parse(" Beta "), Some(Branch::PreRelease));
    }
}
