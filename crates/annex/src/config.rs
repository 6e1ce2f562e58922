//! Annex Configuration
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `ANNEX_`-prefixed environment variables (`__` separates nested keys, e.g.
//! `ANNEX_RESOLVER__TIMEOUT_SECS=60`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnexConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub manifest: ManifestLayout,
    #[serde(default)]
    pub bundle: BundleConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// The host service whose manifest and source are bundled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service project root (the manifest is searched from here upwards)
    pub root: PathBuf,
    /// Manifest file name
    pub manifest: String,
    /// Top-level source units linked into the bundle
    pub source_units: Vec<String>,
    /// Files linked only when present (e.g. `.env`)
    pub optional_links: Vec<String>,
    /// Suffix appended to the project identity in the merged manifest
    pub bundled_suffix: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            manifest: "pyproject.toml".to_string(),
            source_units: vec!["src".to_string()],
            optional_links: vec![".env".to_string()],
            bundled_suffix: "-bundled".to_string(),
        }
    }
}

/// Key paths of the service manifest that the merge touches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestLayout {
    /// Dotted path of the project identity (a string)
    pub identity_key: String,
    /// Dotted path of the dependency list (an array of strings)
    pub dependencies_key: String,
    /// Dotted path of the source-override table
    pub sources_key: String,
    /// Operator used to pin registry versions
    pub pin_operator: String,
}

impl Default for ManifestLayout {
    fn default() -> Self {
        Self {
            identity_key: "project.name".to_string(),
            dependencies_key: "project.dependencies".to_string(),
            sources_key: "tool.uv.sources".to_string(),
            pin_operator: "==".to_string(),
        }
    }
}

/// Bundled environment target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleConfig {
    pub dir: PathBuf,
    /// Build into `<dir>.staging` and swap only after success. Otherwise the
    /// build runs in place with the live directory moved aside until it
    /// succeeds.
    pub staging: bool,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/bundled"),
            staging: false,
        }
    }
}

/// Where installed plugin artifacts are discovered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginsConfig {
    pub artifact_root: PathBuf,
    /// Descriptor path relative to each artifact directory
    pub descriptor: PathBuf,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            artifact_root: PathBuf::from("./data/bundled/plugins"),
            descriptor: PathBuf::from("annex.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/annex.redb"),
        }
    }
}

/// External dependency resolver command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub program: String,
    /// Arguments for the resolve-only (plan) mode
    pub plan_args: Vec<String>,
    /// Arguments for the lock step
    pub lock_args: Vec<String>,
    /// Arguments for the install/sync step
    pub sync_args: Vec<String>,
    pub timeout_secs: u64,
    /// Diagnostics longer than this are truncated before storage
    pub max_diagnostic_len: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            program: "uv".to_string(),
            plan_args: vec!["lock".to_string(), "--dry-run".to_string()],
            lock_args: vec!["lock".to_string()],
            sync_args: vec!["sync".to_string()],
            timeout_secs: 300,
            max_diagnostic_len: 4096,
        }
    }
}

impl ResolverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockConfig {
    /// How long an operation waits for the region lock
    pub wait_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { wait_secs: 30 }
    }
}

impl LockConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

impl AnnexConfig {
    /// Build the figment for the given (optional) config file
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(AnnexConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("ANNEX_").split("__"))
    }

    /// Load configuration; a missing file is tolerated
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }
}
