// ─── URL Templates ───
// Placeholder substitution for operator-supplied URL templates, with optional
// remapping of canonical OS / arch / branch tokens to the operator's naming.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::version::{Branch, Platform};

/// Canonical-token -> operator-token tables. Missing entries pass through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRemaps {
    #[serde(default)]
    pub os_map: HashMap<String, String>,
    #[serde(default)]
    pub arch_map: HashMap<String, String>,
    #[serde(default)]
    pub branch_map: HashMap<String, String>,
    /// Keyed by `"{os}-{arch}"`; used by index documents.
    #[serde(default)]
    pub platform_map: HashMap<String, String>,
}

impl TokenRemaps {
    pub fn os<'a>(&'a self, platform: &Platform) -> &'a str {
        remap(&self.os_map, platform.os.as_str())
    }

    pub fn arch<'a>(&'a self, platform: &Platform) -> &'a str {
        remap(&self.arch_map, platform.arch.as_str())
    }

    pub fn branch(&self, branch: Branch) -> &str {
        remap(&self.branch_map, branch.as_str())
    }

    pub fn platform_key(&self, platform: &Platform) -> String {
        let key = platform.key();
        self.platform_map.get(&key).cloned().unwrap_or(key)
    }
}

fn remap<'a>(table: &'a HashMap<String, String>, canonical: &'static str) -> &'a str {
    table.get(canonical).map(String::as_str).unwrap_or(canonical)
}

/// Values available to a template. `None` leaves the placeholder untouched.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars<'a> {
    pub base: &'a str,
    pub os: &'a str,
    pub arch: &'a str,
    pub branch: &'a str,
    pub version: Option<u32>,
    pub from: Option<u32>,
    pub to: Option<u32>,
}

impl<'a> TemplateVars<'a> {
    pub fn new(base: &'a str, remaps: &'a TokenRemaps, platform: &Platform, branch: Branch) -> Self {
        Self {
            base: base.trim_end_matches('/'),
            os: remaps.os(platform),
            arch: remaps.arch(platform),
            branch: remaps.branch(branch),
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_diff(mut self, from: u32, to: u32) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }
}

/// Substitute `{base}`, `{os}`, `{arch}`, `{branch}`, `{version}`, `{from}`
/// and `{to}` in `template`.
pub fn render(template: &str, vars: &TemplateVars<'_>) -> String {
    let mut out = template
        .replace("{base}", vars.base)
        .replace("{os}", vars.os)
        .replace("{arch}", vars.arch)
        .replace("{branch}", vars.branch);

    for (placeholder, value) in [
        ("{version}", vars.version),
        ("{from}", vars.from),
        ("{to}", vars.to),
    ] {
        if let Some(value) = value {
            out = out.replace(placeholder, &value.to_string());
        }
    }

    out
}
