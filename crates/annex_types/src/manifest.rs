// Plugin Manifest - The descriptor shipped inside every plugin artifact
//
// Parsed fresh from disk whenever it is needed, never persisted. Unknown
// fields are ignored so newer plugins keep loading on older hosts.

use serde::{Deserialize, Serialize};

/// Artifact descriptor (`annex.json` inside the installed package directory)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Human-readable name
    pub name: String,
    /// Descriptive version string
    pub version: String,
    /// Fully qualified implementation type, e.g. `weather_plugin::WeatherPlugin`
    #[serde(alias = "entryPoint")]
    pub entry_point: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Route namespace (no leading slash), e.g. `weather`
    #[serde(default, alias = "urlPrefix")]
    pub url_prefix: Option<String>,
}

impl PluginManifest {
    /// Parse a descriptor from JSON text
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Parse and validate the declared entry point
    pub fn entry_point(&self) -> Result<EntryPoint, EntryPointError> {
        self.entry_point.parse()
    }

    /// Normalized route prefix, `None` when absent or blank
    pub fn route_prefix(&self) -> Option<&str> {
        self.url_prefix
            .as_deref()
            .map(|prefix| prefix.trim_matches('/'))
            .filter(|prefix| !prefix.is_empty())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry Points
// ─────────────────────────────────────────────────────────────────────────────

/// Why an entry-point string was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryPointError {
    #[error("entry point is empty")]
    Empty,

    #[error("entry point `{0}` is not qualified with a module path")]
    Unqualified(String),

    #[error("entry point `{0}` is relative (starts with crate/self/super or `::`)")]
    Relative(String),

    #[error("entry point `{path}` has an invalid segment `{segment}`")]
    InvalidSegment { path: String, segment: String },
}

/// A validated, fully qualified `module::path::Type` reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryPoint(String);

impl EntryPoint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Module path without the type name
    pub fn module_path(&self) -> &str {
        self.0.rsplit_once("::").map(|(module, _)| module).unwrap_or("")
    }

    /// Implementation type name
    pub fn type_name(&self) -> &str {
        self.0.rsplit_once("::").map(|(_, name)| name).unwrap_or(&self.0)
    }
}

impl std::str::FromStr for EntryPoint {
    type Err = EntryPointError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let path = raw.trim();
        if path.is_empty() {
            return Err(EntryPointError::Empty);
        }
        if path.starts_with("::") {
            return Err(EntryPointError::Relative(path.to_string()));
        }

        let segments: Vec<&str> = path.split("::").collect();
        if segments.len() < 2 {
            return Err(EntryPointError::Unqualified(path.to_string()));
        }
        if matches!(segments[0], "crate" | "self" | "super") {
            return Err(EntryPointError::Relative(path.to_string()));
        }

        for segment in &segments {
            if !is_identifier(segment) {
                return Err(EntryPointError::InvalidSegment {
                    path: path.to_string(),
                    segment: segment.to_string(),
                });
            }
        }

        Ok(Self(path.to_string()))
    }
}

impl std::fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) if first == '_' || first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
