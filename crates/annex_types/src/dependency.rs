// Dependency Specs - How a plugin record becomes a manifest dependency
//
// Registry plugins become a single pinned line (`name==version`). VCS plugins
// become a bare name in the dependency list plus a source override (git URL
// and branch) recorded separately, because the resolver has no other way to
// know where the package comes from.

use serde::{Deserialize, Serialize};

use crate::record::{PluginRecord, SourceType};

/// Where the resolver should fetch a VCS-sourced package from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceOverride {
    pub git: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// A dependency derived from a plugin record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencySpec {
    /// Name as it appears in the dependency list
    pub package: String,
    /// Pinned version (registry plugins only)
    pub version: Option<String>,
    /// Source override (VCS plugins only)
    pub source: Option<SourceOverride>,
}

impl DependencySpec {
    /// Derive the spec deterministically from `source`, `source_type` and the
    /// record's target version.
    pub fn from_record(record: &PluginRecord) -> Self {
        let version = record.target_version().map(str::to_string);
        match record.source_type {
            SourceType::Registry => Self {
                package: record.source.clone(),
                version,
                source: None,
            },
            SourceType::Vcs => Self {
                package: record.package_name(),
                version: None,
                source: Some(SourceOverride {
                    git: record.source.clone(),
                    branch: version,
                }),
            },
        }
    }

    /// Render the dependency-list line using the given pin operator
    pub fn to_line(&self, pin_operator: &str) -> String {
        match self.version.as_deref() {
            Some(version) => format!("{}{}{}", self.package, pin_operator, version),
            None => self.package.clone(),
        }
    }

    /// Normalized name used to compare packages (case and `-`/`_`/`.` folded)
    pub fn key(&self) -> String {
        normalize_package(&self.package)
    }
}

/// A dependency line split into its package name and the remaining constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyLine {
    pub package: String,
    pub constraint: String,
}

impl DependencyLine {
    /// Split a requirement line at the end of its package name
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let end = line
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
            .unwrap_or(line.len());
        if end == 0 {
            return None;
        }
        Some(Self {
            package: line[..end].to_string(),
            constraint: line[end..].trim().to_string(),
        })
    }

    /// The pinned version when the constraint is exactly `<pin_operator><version>`
    pub fn pinned_version(&self, pin_operator: &str) -> Option<&str> {
        self.constraint
            .strip_prefix(pin_operator)
            .map(str::trim)
            .filter(|version| !version.is_empty() && !version.contains(','))
    }

    /// Normalized package name
    pub fn key(&self) -> String {
        normalize_package(&self.package)
    }
}

/// Fold case and separators so `Acme_Weather` and `acme-weather` compare equal
pub fn normalize_package(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '_' | '.' => '-',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}
