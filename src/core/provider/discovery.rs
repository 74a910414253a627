// ─── Version Discovery ───
// How a pattern provider learns which versions exist: a JSON listing API,
// a scraped directory index, or a fixed list from the descriptor.

use std::collections::BTreeMap;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::json_path::JsonPath;
use super::template::{render, TemplateVars};
use crate::core::error::{ResolverError, ResolverResult};
use crate::core::http::HttpTransport;
use crate::core::version::Branch;

/// `versionDiscovery` block of a pattern descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum DiscoveryConfig {
    #[serde(rename_all = "camelCase")]
    JsonApi { url: String, json_path: String },
    #[serde(rename_all = "camelCase", alias = "directory-listing")]
    HtmlAutoindex {
        url: String,
        pattern: String,
        #[serde(default)]
        min_file_size: u64,
    },
    #[serde(rename_all = "camelCase")]
    StaticList { versions: StaticVersions },
}

/// Either one list for every branch or a list per branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StaticVersions {
    All(Vec<u32>),
    PerBranch(BTreeMap<Branch, Vec<u32>>),
}

impl StaticVersions {
    pub fn for_branch(&self, branch: Branch) -> Vec<u32> {
        match self {
            StaticVersions::All(versions) => versions.clone(),
            StaticVersions::PerBranch(map) => map.get(&branch).cloned().unwrap_or_default(),
        }
    }
}

/// Validated discovery strategy.
#[derive(Debug, Clone)]
pub enum VersionDiscovery {
    JsonApi {
        url: String,
        path: JsonPath,
    },
    DirectoryListing {
        url: String,
        pattern: Regex,
        min_file_size: u64,
    },
    Static(StaticVersions),
}

impl VersionDiscovery {
    /// Parse paths and compile patterns. Errors here reject the descriptor.
    pub fn compile(config: &DiscoveryConfig) -> ResolverResult<Self> {
        match config {
            DiscoveryConfig::JsonApi { url, json_path } => Ok(Self::JsonApi {
                url: url.clone(),
                path: json_path.parse()?,
            }),
            DiscoveryConfig::HtmlAutoindex {
                url,
                pattern,
                min_file_size,
            } => {
                let pattern = Regex::new(pattern)?;
                if pattern.captures_len() < 2 {
                    return Err(ResolverError::Other(format!(
                        "listing pattern '{}' needs a capture group for the version",
                        pattern.as_str()
                    )));
                }
                if has_named_groups(&pattern)
                    && !pattern.capture_names().flatten().any(|n| n == "version")
                {
                    return Err(ResolverError::Other(format!(
                        "listing pattern '{}' uses named groups but none is called 'version'",
                        pattern.as_str()
                    )));
                }
                Ok(Self::DirectoryListing {
                    url: url.clone(),
                    pattern,
                    min_file_size: *min_file_size,
                })
            }
            DiscoveryConfig::StaticList { versions } => Ok(Self::Static(versions.clone())),
        }
    }

    pub fn method_name(&self) -> &'static str {
        match self {
            Self::JsonApi { .. } => "json-api",
            Self::DirectoryListing { .. } => "html-autoindex",
            Self::Static(_) => "static-list",
        }
    }

    /// Versions currently offered for `branch`, ascending and deduplicated.
    pub async fn discover(
        &self,
        transport: &dyn HttpTransport,
        vars: &TemplateVars<'_>,
        branch: Branch,
        cancel: &CancellationToken,
    ) -> ResolverResult<Vec<u32>> {
        let mut versions = match self {
            Self::JsonApi { url, path } => {
                let url = render(url, vars);
                let body = transport.get_text(&url, None, cancel).await?;
                let document: serde_json::Value = serde_json::from_str(&body)?;
                path.extract_versions(&document)?
            }
            Self::DirectoryListing {
                url,
                pattern,
                min_file_size,
            } => {
                let url = render(url, vars);
                let body = transport.get_text(&url, None, cancel).await?;
                scrape_listing(&body, pattern, *min_file_size)
            }
            Self::Static(list) => list.for_branch(branch),
        };

        versions.sort_unstable();
        versions.dedup();
        Ok(versions)
    }
}

fn has_named_groups(pattern: &Regex) -> bool {
    pattern.capture_names().flatten().next().is_some()
}

/// Named patterns are read by name only; unnamed ones by position.
fn capture<'h>(caps: &Captures<'h>, named: bool, name: &str, index: usize) -> Option<&'h str> {
    if named {
        caps.name(name).map(|m| m.as_str())
    } else {
        caps.get(index).map(|m| m.as_str())
    }
}

/// Extract versions from a directory index page. Rows whose captured size is
/// below `min_file_size` are dropped as incomplete uploads.
pub fn scrape_listing(html: &str, pattern: &Regex, min_file_size: u64) -> Vec<u32> {
    let mut versions = Vec::new();
    let named = has_named_groups(pattern);

    for caps in pattern.captures_iter(html) {
        let Some(version) =
            capture(&caps, named, "version", 1).and_then(|v| v.parse::<u32>().ok())
        else {
            continue;
        };

        if let Some(raw_size) = capture(&caps, named, "size", 2) {
            match parse_size(raw_size) {
                Some(size) if size < min_file_size => {
                    debug!(
                        "Skipping version {} ({} bytes < {} minimum)",
                        version, size, min_file_size
                    );
                    continue;
                }
                _ => {}
            }
        }

        versions.push(version);
    }

    versions
}

/// Plain byte counts or autoindex-style `12K`, `1.5M`, `2G`.
pub fn parse_size(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let (number, multiplier) = match raw.chars().last()? {
        'K' | 'k' => (&raw[..raw.len() - 1], 1u64 << 10),
        'M' | 'm' => (&raw[..raw.len() - 1], 1u64 << 20),
        'G' | 'g' => (&raw[..raw.len() - 1], 1u64 << 30),
        _ => (raw, 1),
    };

    if multiplier == 1 {
        return number.parse().ok();
    }
    let value: f64 = number.trim().parse().ok()?;
    Some((value * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::http::fake::FakeTransport;
    use crate::core::provider::template::TokenRemaps;
    use crate::core::version::Platform;

    #[test]
    fn descriptor_block_deserializes_by_method() {
        let config: DiscoveryConfig = serde_json::from_value(serde_json::json!({
            "method": "json-api",
            "url": "{base}/api/{branch}",
            "jsonPath": "items[].version"
        }))
        .unwrap();
        assert_eq!(
            config,
            DiscoveryConfig::JsonApi {
                url: "{base}/api/{branch}".into(),
                json_path: "items[].version".into()
            }
        );

        let config: DiscoveryConfig = serde_json::from_value(serde_json::json!({
            "method": "static-list",
            "versions": {"release": [1, 2], "prerelease": [5]}
        }))
        .unwrap();
        let DiscoveryConfig::StaticList { versions } = config else {
            panic!("expected static list");
        };
        assert_eq!(versions.for_branch(Branch::PreRelease), vec![5]);
    }

    #[test]
    fn unsupported_json_path_fails_compilation() {
        let err = VersionDiscovery::compile(&DiscoveryConfig::JsonApi {
            url: "u".into(),
            json_path: "data.items[0]".into(),
        })
        .unwrap_err();
        assert!(matches!(err, ResolverError::UnsupportedJsonPath(_)));
    }

    #[test]
    fn listing_pattern_without_group_is_rejected() {
        let result = VersionDiscovery::compile(&DiscoveryConfig::HtmlAutoindex {
            url: "u".into(),
            pattern: r"\d+\.pwr".into(),
            min_file_size: 0,
        });
        assert!(result.is_err());
    }

    #[test]
    fn scrape_drops_small_entries() {
        let html = r#"
            <a href="1.pwr">1.pwr</a>   1048576
            <a href="2.pwr">2.pwr</a>   12
            <a href="3.pwr">3.pwr</a>   2M
        "#;
        let pattern = Regex::new(r#"href="(\d+)\.pwr">[^<]*</a>\s+(\S+)"#).unwrap();
        assert_eq!(scrape_listing(html, &pattern, 1024), vec![1, 3]);
    }

    #[test]
    fn scrape_without_size_group_keeps_everything() {
        let pattern = Regex::new(r#"href="(?P<version>\d+)\.pwr""#).unwrap();
        let html = r#"<a href="4.pwr"></a><a href="9.pwr"></a><a href="x.pwr"></a>"#;
        assert_eq!(scrape_listing(html, &pattern, u64::MAX), vec![4, 9]);
    }

    #[test]
    fn named_pattern_never_reads_size_by_position() {
        let pattern = Regex::new(r#"href="(\w+)/(?P<version>\d+)\.pwr""#).unwrap();
        let html = r#"<a href="linux/7.pwr"></a><a href="linux/8.pwr"></a>"#;
        assert_eq!(scrape_listing(html, &pattern, 1024), vec![7, 8]);
    }

    #[test]
    fn named_pattern_without_version_group_is_rejected() {
        let result = VersionDiscovery::compile(&DiscoveryConfig::HtmlAutoindex {
            url: "u".into(),
            pattern: r"(?P<build>\d+)\.pwr".into(),
            min_file_size: 0,
        });
        assert!(result.is_err());
    }

    #[test]
    fn parse_size_understands_suffixes() {
        assert_eq!(parse_size("512"), Some(512));
        assert_eq!(parse_size("2K"), Some(2048));
        assert_eq!(parse_size("1.5M"), Some(1_572_864));
        assert_eq!(parse_size("-"), None);
    }

    #[tokio::test]
    async fn json_api_discovery_renders_url_and_sorts() {
        let transport = FakeTransport::new().with_body(
            "https://m.example/api/release",
            r#"{"items":[{"version":3},{"version":1},{"version":3}]}"#,
        );
        let discovery = VersionDiscovery::compile(&DiscoveryConfig::JsonApi {
            url: "{base}/api/{branch}".into(),
            json_path: "items[].version".into(),
        })
        .unwrap();
        let remaps = TokenRemaps::default();
        let platform = Platform::current();
        let vars = TemplateVars::new("https://m.example", &remaps, &platform, Branch::Release);

        let versions = discovery
            .discover(&transport, &vars, Branch::Release, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(versions, vec![1, 3]);
    }
}
