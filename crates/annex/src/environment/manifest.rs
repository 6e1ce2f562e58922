// Service Manifest - Locating the service's own manifest and merging plugins into it
//
// The merged manifest is the service manifest with its identity renamed, one
// dependency line appended per accepted plugin and one source override per
// VCS plugin. Overrides the service already declares are carried forward
// untouched.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use annex_types::{DependencyLine, DependencySpec, PluginRecord, SourceOverride};
use toml::{Table, Value};

use crate::config::ManifestLayout;

/// Errors raised while reading, merging or writing manifests
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("could not find {name} or {original} in {start} or any parent directory")]
    NotFound {
        name: String,
        original: String,
        start: PathBuf,
    },

    #[error("failed to access manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize manifest: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("manifest layout error: {0}")]
    Layout(String),
}

/// `pyproject.toml` -> `pyproject.original.toml`
pub fn original_name(manifest_name: &str) -> String {
    let path = Path::new(manifest_name);
    match (
        path.file_stem().and_then(|s| s.to_str()),
        path.extension().and_then(|s| s.to_str()),
    ) {
        (Some(stem), Some(ext)) => format!("{stem}.original.{ext}"),
        _ => format!("{manifest_name}.original"),
    }
}

/// The service's own (clean) manifest
#[derive(Debug, Clone)]
pub struct ServiceManifest {
    path: PathBuf,
    table: Table,
}

impl ServiceManifest {
    /// Walk up from `start` looking for the manifest. In each directory the
    /// `.original` variant wins, so a process running inside a bundled
    /// environment still finds the clean manifest.
    pub fn locate(start: &Path, manifest_name: &str) -> Result<PathBuf, ManifestError> {
        let original = original_name(manifest_name);
        let start = std::path::absolute(start).map_err(|source| ManifestError::Io {
            path: start.to_path_buf(),
            source,
        })?;

        let mut current = Some(start.as_path());
        while let Some(dir) = current {
            for candidate in [dir.join(&original), dir.join(manifest_name)] {
                if candidate.is_file() {
                    // Resolve the link so we always point at the real file
                    return candidate
                        .canonicalize()
                        .map_err(|source| ManifestError::Io {
                            path: candidate.clone(),
                            source,
                        });
                }
            }
            current = dir.parent();
        }

        Err(ManifestError::NotFound {
            name: manifest_name.to_string(),
            original,
            start,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }

    pub fn parse(path: &Path, text: &str) -> Result<Self, ManifestError> {
        let table = text.parse::<Table>().map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            table,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Build the merged manifest for the given accepted records
    pub fn merge(
        &self,
        records: &[PluginRecord],
        layout: &ManifestLayout,
        identity_suffix: &str,
    ) -> Result<MergedManifest, ManifestError> {
        let mut table = self.table.clone();

        let identity = value_mut(&mut table, &layout.identity_key)
            .and_then(|value| match value {
                Value::String(name) => Some(name),
                _ => None,
            })
            .ok_or_else(|| {
                ManifestError::Layout(format!(
                    "`{}` is missing or not a string",
                    layout.identity_key
                ))
            })?;
        identity.push_str(identity_suffix);

        let existing_sources: HashSet<String> = value(&table, &layout.sources_key)
            .and_then(Value::as_table)
            .map(|sources| {
                sources
                    .keys()
                    .map(|key| annex_types::normalize_package(key))
                    .collect()
            })
            .unwrap_or_default();

        let mut seen = HashSet::new();
        let mut plugins = Vec::new();
        for record in records {
            let spec = DependencySpec::from_record(record);
            let key = spec.key();
            if spec.source.is_some() && existing_sources.contains(&key) {
                tracing::debug!(
                    "Skipping VCS plugin {}: {} already has a source override",
                    record.name,
                    spec.package
                );
                continue;
            }
            if !seen.insert(key) {
                tracing::warn!(
                    "Skipping duplicate plugin dependency {} ({})",
                    spec.package,
                    record.name
                );
                continue;
            }
            plugins.push(spec);
        }

        let dependencies = entry_mut(&mut table, &layout.dependencies_key, || {
            Value::Array(Vec::new())
        })?
        .as_array_mut()
        .ok_or_else(|| {
            ManifestError::Layout(format!("`{}` is not an array", layout.dependencies_key))
        })?;
        for spec in &plugins {
            dependencies.push(Value::String(spec.to_line(&layout.pin_operator)));
        }

        if plugins.iter().any(|spec| spec.source.is_some()) {
            let sources = entry_mut(&mut table, &layout.sources_key, || {
                Value::Table(Table::new())
            })?
            .as_table_mut()
            .ok_or_else(|| {
                ManifestError::Layout(format!("`{}` is not a table", layout.sources_key))
            })?;
            for spec in &plugins {
                if let Some(source) = &spec.source {
                    let value = Value::try_from(source)?;
                    sources.insert(spec.package.clone(), value);
                }
            }
        }

        Ok(MergedManifest { table, plugins })
    }
}

/// A service manifest with plugin dependencies merged in
#[derive(Debug, Clone)]
pub struct MergedManifest {
    table: Table,
    /// Plugin dependencies that made it into the manifest
    pub plugins: Vec<DependencySpec>,
}

impl MergedManifest {
    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn to_toml_string(&self) -> Result<String, ManifestError> {
        Ok(toml::to_string_pretty(&self.table)?)
    }

    pub async fn write(&self, path: &Path) -> Result<(), ManifestError> {
        let text = self.to_toml_string()?;
        tokio::fs::write(path, text)
            .await
            .map_err(|source| ManifestError::Io {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// Dependency lines and source overrides read back out of a manifest
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestEntries {
    pub dependencies: Vec<String>,
    pub sources: BTreeMap<String, Value>,
}

impl ManifestEntries {
    pub fn read(table: &Table, layout: &ManifestLayout) -> Self {
        let dependencies = value(table, &layout.dependencies_key)
            .and_then(Value::as_array)
            .map(|lines| {
                lines
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let sources = value(table, &layout.sources_key)
            .and_then(Value::as_table)
            .map(|sources| {
                sources
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            dependencies,
            sources,
        }
    }

    /// Entries present here but not in `base`, as parsed lines and git overrides
    pub fn added_since(
        &self,
        base: &ManifestEntries,
    ) -> (Vec<DependencyLine>, BTreeMap<String, SourceOverride>) {
        let lines = self
            .dependencies
            .iter()
            .filter(|line| !base.dependencies.contains(line))
            .filter_map(|line| DependencyLine::parse(line))
            .collect();
        let overrides = self
            .sources
            .iter()
            .filter(|(key, _)| !base.sources.contains_key(*key))
            .filter_map(|(key, value)| {
                value
                    .clone()
                    .try_into::<SourceOverride>()
                    .ok()
                    .map(|source| (key.clone(), source))
            })
            .collect();
        (lines, overrides)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dotted key paths
// ─────────────────────────────────────────────────────────────────────────────

fn value<'a>(table: &'a Table, key: &str) -> Option<&'a Value> {
    let mut segments = key.split('.');
    let mut current = table.get(segments.next()?)?;
    for segment in segments {
        current = current.get(segment)?;
    }
    Some(current)
}

fn value_mut<'a>(table: &'a mut Table, key: &str) -> Option<&'a mut Value> {
    let mut segments = key.split('.');
    let mut current = table.get_mut(segments.next()?)?;
    for segment in segments {
        current = current.get_mut(segment)?;
    }
    Some(current)
}

/// Get the value at `key`, creating intermediate tables and the leaf as needed
fn entry_mut<'a>(
    table: &'a mut Table,
    key: &str,
    default: impl FnOnce() -> Value,
) -> Result<&'a mut Value, ManifestError> {
    let mut segments: Vec<&str> = key.split('.').collect();
    let leaf = segments
        .pop()
        .filter(|leaf| !leaf.is_empty())
        .ok_or_else(|| ManifestError::Layout(format!("invalid key path `{key}`")))?;

    let mut current = table;
    for segment in segments {
        current = current
            .entry(segment)
            .or_insert_with(|| Value::Table(Table::new()))
            .as_table_mut()
            .ok_or_else(|| {
                ManifestError::Layout(format!("`{segment}` in `{key}` is not a table"))
            })?;
    }
    Ok(current.entry(leaf).or_insert_with(default))
}
