// ─── JSON Path ───
// The three path forms accepted by JSON listing discovery:
//   "$root"        the document itself is the array
//   "field"        a top-level array
//   "arr[].field"  pluck `field` from every object of a top-level array
// Anything else is rejected when the descriptor is loaded.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::core::error::{ResolverError, ResolverResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonPath {
    Root,
    Field(String),
    Pluck { array: String, field: String },
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl FromStr for JsonPath {
    type Err = ResolverError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let path = raw.trim();
        if path == "$root" {
            return Ok(JsonPath::Root);
        }
        if is_identifier(path) {
            return Ok(JsonPath::Field(path.to_string()));
        }
        if let Some((array, field)) = path.split_once("[].") {
            if is_identifier(array) && is_identifier(field) {
                return Ok(JsonPath::Pluck {
                    array: array.to_string(),
                    field: field.to_string(),
                });
            }
        }
        Err(ResolverError::UnsupportedJsonPath(raw.to_string()))
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonPath::Root => f.write_str("$root"),
            JsonPath::Field(name) => f.write_str(name),
            JsonPath::Pluck { array, field } => write!(f, "{}[].{}", array, field),
        }
    }
}

/// Integers and integer-looking strings; everything else is skipped.
fn as_version(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl JsonPath {
    /// Extract the version list this path points at.
    ///
    /// A path that does not land on an array is an error; individual
    /// non-integer elements are not.
    pub fn extract_versions(&self, document: &Value) -> ResolverResult<Vec<u32>> {
        let mismatch = |reason: &str| ResolverError::JsonPathMismatch {
            path: self.to_string(),
            reason: reason.to_string(),
        };

        match self {
            JsonPath::Root => {
                let items = document
                    .as_array()
                    .ok_or_else(|| mismatch("document root is not an array"))?;
                Ok(items.iter().filter_map(as_version).collect())
            }
            JsonPath::Field(name) => {
                let items = document
                    .get(name)
                    .and_then(Value::as_array)
                    .ok_or_else(|| mismatch("field is missing or not an array"))?;
                Ok(items.iter().filter_map(as_version).collect())
            }
            JsonPath::Pluck { array, field } => {
                let items = document
                    .get(array)
                    .and_then(Value::as_array)
                    .ok_or_else(|| mismatch("array field is missing or not an array"))?;
                Ok(items
                    .iter()
                    .filter_map(|item| item.get(field))
                    .filter_map(as_version)
                    .collect())
            }
        }
    }
}
