//! End-to-end lifecycle scenarios: create, build, reconcile, serve.
//!
//! The resolver is stubbed; its install step writes the descriptor of every
//! known package that appears in the merged dependency list, the way a real
//! installer would leave artifacts in the bundle.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use annex::config::AnnexConfig;
use annex::environment::{
    ManifestEntries, ResolveMode, ResolveOutput, Resolver, ResolverError, ServiceManifest,
};
use annex::server::{AppState, create_router};
use annex::store::MemoryStore;
use annex::{AnnexHost, Error, builtin};
use annex_types::{NewPlugin, PluginStatus, SourceOverride, SourceType};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};
use tower::ServiceExt;

const STATUS: &str = builtin::STATUS_ENTRY_POINT;

// ─────────────────────────────────────────────────────────────────────────────
// Stub resolver
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct StubResolver {
    /// Pairs of dependency lines that cannot resolve together
    conflicts: Vec<(String, String)>,
    /// (package directory, descriptor JSON) installed when the package is listed
    artifacts: Vec<(String, String)>,
    installs: AtomicUsize,
}

impl StubResolver {
    fn conflict(mut self, a: &str, b: &str) -> Self {
        self.conflicts.push((a.to_string(), b.to_string()));
        self
    }

    fn artifact(mut self, package: &str, name: &str, entry_point: &str, prefix: Option<&str>) -> Self {
        let descriptor = serde_json::json!({
            "name": name,
            "version": "0.1.0",
            "entry_point": entry_point,
            "url_prefix": prefix,
        });
        self.artifacts.push((package.to_string(), descriptor.to_string()));
        self
    }
}

#[async_trait]
impl Resolver for StubResolver {
    async fn resolve(
        &self,
        manifest: &Path,
        mode: ResolveMode,
        cwd: &Path,
    ) -> Result<ResolveOutput, ResolverError> {
        let text = tokio::fs::read_to_string(manifest).await.unwrap_or_default();

        for (a, b) in &self.conflicts {
            if text.contains(a.as_str()) && text.contains(b.as_str()) {
                return Ok(ResolveOutput::failed(format!(
                    "no solution: {a} and {b} are incompatible"
                )));
            }
        }

        if mode == ResolveMode::LockAndInstall {
            self.installs.fetch_add(1, Ordering::SeqCst);
            for (package, descriptor) in &self.artifacts {
                if !text.contains(&format!("\"{package}")) {
                    continue;
                }
                let dir = cwd.join("plugins").join(package);
                tokio::fs::create_dir_all(&dir).await.unwrap();
                tokio::fs::write(dir.join("annex.json"), descriptor).await.unwrap();
            }
        }
        Ok(ResolveOutput::ok())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fixture
// ─────────────────────────────────────────────────────────────────────────────

struct Fixture {
    dir: TempDir,
    config: AnnexConfig,
    resolver: Arc<StubResolver>,
    host: AnnexHost,
}

impl Fixture {
    fn new(resolver: StubResolver) -> Self {
        let dir = TempDir::new().unwrap();
        let service = dir.path().join("service");
        std::fs::create_dir_all(service.join("src")).unwrap();
        std::fs::write(
            service.join("pyproject.toml"),
            "[project]\nname = \"home\"\nversion = \"1.0.0\"\ndependencies = [\"fastapi>=0.110\"]\n",
        )
        .unwrap();
        std::fs::write(service.join("src").join("app.py"), "app = None\n").unwrap();

        let mut config = AnnexConfig::default();
        config.service.root = service;
        config.bundle.dir = dir.path().join("bundle");
        config.plugins.artifact_root = dir.path().join("bundle").join("plugins");
        config.resolver.timeout_secs = 5;
        config.lock.wait_secs = 5;

        let resolver = Arc::new(resolver);
        let host = Self::host(&config, resolver.clone());
        Self {
            dir,
            config,
            resolver,
            host,
        }
    }

    fn host(config: &AnnexConfig, resolver: Arc<StubResolver>) -> AnnexHost {
        AnnexHost::new(
            config,
            Arc::new(MemoryStore::new()),
            resolver,
            builtin::catalog().unwrap(),
        )
    }

    fn bundle_manifest(&self) -> PathBuf {
        self.config.bundle.dir.join("pyproject.toml")
    }

    async fn get(&self, uri: &str) -> StatusCode {
        let state = AppState::new(
            self.host.lifecycle.clone(),
            self.host.registry.clone(),
            self.config.lock.wait(),
        );
        let app = create_router(state, self.host.routes.router());
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }
}

fn registry(name: &str, source: &str, version: &str) -> NewPlugin {
    NewPlugin {
        name: name.to_string(),
        source: source.to_string(),
        source_type: SourceType::Registry,
        version: version.to_string(),
        package_name: None,
    }
}

fn vcs(name: &str, url: &str, branch: &str) -> NewPlugin {
    NewPlugin {
        name: name.to_string(),
        source: url.to_string(),
        source_type: SourceType::Vcs,
        version: branch.to_string(),
        package_name: None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_vcs_plugin_from_create_to_served_route() {
    let fx = Fixture::new(StubResolver::default().artifact(
        "weather-plugin",
        "weather",
        STATUS,
        Some("weather"),
    ));

    let created = assert_ok!(
        fx.host
            .lifecycle
            .create(vcs("Weather", "https://github.com/acme/weather-plugin.git", "main"))
            .await
    );
    assert_eq!(created.status, PluginStatus::Pending);
    assert_eq!(created.updated_version.as_deref(), Some("main"));
    assert_eq!(created.installed_version, None);
    assert_eq!(fx.get("/weather").await, StatusCode::NOT_FOUND);

    assert_ok!(fx.host.lifecycle.build().await);
    let report = assert_ok!(fx.host.orchestrator.reconcile().await);
    assert_eq!(report.promoted, vec![created.id.clone()]);
    assert_eq!(report.activated, vec![created.id.clone()]);

    let installed = fx.host.lifecycle.get(&created.id).unwrap();
    assert_eq!(installed.status, PluginStatus::Installed);
    assert_eq!(installed.installed_version.as_deref(), Some("main"));
    assert_eq!(installed.updated_version, None);

    assert_ne!(fx.get("/weather").await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_concurrent_conflicting_creates_one_wins() {
    let fx = Fixture::new(StubResolver::default().conflict("acme-a==1.0.0", "acme-b==1.0.0"));
    let lifecycle = fx.host.lifecycle.clone();

    let (a, b) = tokio::join!(
        lifecycle.create(registry("A", "acme-a", "1.0.0")),
        lifecycle.create(registry("B", "acme-b", "1.0.0")),
    );
    assert!(a.is_ok() != b.is_ok(), "exactly one create must be accepted");

    let loser = if a.is_err() { a } else { b };
    let err = assert_err!(loser);
    let Error::Conflict { id, diagnostic } = err else {
        panic!("expected conflict");
    };
    assert!(diagnostic.contains("incompatible"));

    let records = fx.host.lifecycle.list().unwrap();
    assert_eq!(records.len(), 2);
    let rejected = records.iter().find(|r| r.id == id).unwrap();
    assert_eq!(rejected.status, PluginStatus::Failed);
    assert_eq!(
        records.iter().filter(|r| r.status == PluginStatus::Pending).count(),
        1
    );
}

#[tokio::test]
async fn test_unresolvable_entry_point_is_isolated() {
    let fx = Fixture::new(
        StubResolver::default()
            .artifact("acme-ghost", "ghost", "ghost_plugin::Missing", Some("ghost"))
            .artifact("acme-status", "status", STATUS, Some("status")),
    );

    let ghost = fx
        .host
        .lifecycle
        .create(registry("Ghost", "acme-ghost", "1.0.0"))
        .await
        .unwrap();
    let status = fx
        .host
        .lifecycle
        .create(registry("Status", "acme-status", "2.0.0"))
        .await
        .unwrap();
    fx.host.lifecycle.build().await.unwrap();

    let report = fx.host.orchestrator.reconcile().await.unwrap();
    assert_eq!(report.activated, vec![status.id.clone()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, ghost.id);

    let failed = fx.host.lifecycle.get(&ghost.id).unwrap();
    assert_eq!(failed.status, PluginStatus::Failed);
    assert!(failed.error_message.as_deref().is_some_and(|m| !m.is_empty()));
    assert_eq!(fx.host.registry.names(), vec!["status".to_string()]);
    assert_eq!(fx.get("/status").await, StatusCode::OK);
    assert_eq!(fx.get("/ghost").await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reconcile_twice_is_idempotent() {
    let fx = Fixture::new(
        StubResolver::default()
            .artifact("acme-status", "status", STATUS, Some("status"))
            .artifact("acme-ghost", "ghost", "ghost_plugin::Missing", None),
    );
    fx.host
        .lifecycle
        .create(registry("Status", "acme-status", "2.0.0"))
        .await
        .unwrap();
    fx.host
        .lifecycle
        .create(registry("Ghost", "acme-ghost", "1.0.0"))
        .await
        .unwrap();
    fx.host.lifecycle.build().await.unwrap();

    let first = fx.host.orchestrator.reconcile().await.unwrap();
    assert!(first.transitions() > 0);
    let before = fx.host.lifecycle.list().unwrap();

    let second = fx.host.orchestrator.reconcile().await.unwrap();
    assert_eq!(second.transitions(), 0);
    assert!(second.activated.is_empty());
    assert_eq!(second.already_active.len(), 1);
    assert_eq!(fx.host.lifecycle.list().unwrap(), before);
}

#[tokio::test]
async fn test_unregistered_artifact_is_recorded_uninstalled() {
    let fx = Fixture::new(StubResolver::default());
    let stray = fx.config.plugins.artifact_root.join("acme-stray");
    std::fs::create_dir_all(&stray).unwrap();
    std::fs::write(
        stray.join("annex.json"),
        format!(r#"{{"name": "stray", "version": "0.1.0", "entry_point": "{STATUS}"}}"#),
    )
    .unwrap();

    let report = fx.host.orchestrator.reconcile().await.unwrap();
    assert_eq!(report.discovered.len(), 1);
    let record = fx.host.lifecycle.get(&report.discovered[0]).unwrap();
    assert_eq!(record.status, PluginStatus::Uninstalled);
    assert!(fx.host.registry.is_empty());

    let again = fx.host.orchestrator.reconcile().await.unwrap();
    assert!(again.discovered.is_empty());
}

#[tokio::test]
async fn test_delete_leaves_built_environment_until_next_build() {
    let fx = Fixture::new(StubResolver::default());
    let keep = fx
        .host
        .lifecycle
        .create(registry("Keep", "acme-keep", "1.0.0"))
        .await
        .unwrap();
    let gone = fx
        .host
        .lifecycle
        .create(registry("Gone", "acme-gone", "3.1.0"))
        .await
        .unwrap();
    fx.host.lifecycle.build().await.unwrap();
    let built = std::fs::read_to_string(fx.bundle_manifest()).unwrap();
    assert!(built.contains("acme-gone==3.1.0"));

    fx.host.lifecycle.delete(&gone.id).await.unwrap();
    assert_eq!(std::fs::read_to_string(fx.bundle_manifest()).unwrap(), built);
    assert!(matches!(
        fx.host.lifecycle.get(&gone.id),
        Err(Error::NotFound(_))
    ));

    fx.host.lifecycle.build().await.unwrap();
    let rebuilt = std::fs::read_to_string(fx.bundle_manifest()).unwrap();
    assert!(!rebuilt.contains("acme-gone"));
    assert!(rebuilt.contains("acme-keep==1.0.0"));
    assert!(fx.host.lifecycle.get(&keep.id).is_ok());
    assert_eq!(fx.resolver.installs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_merged_manifest_round_trips_accepted_set() {
    let fx = Fixture::new(StubResolver::default());
    fx.host
        .lifecycle
        .create(vcs("Weather", "https://github.com/acme/weather-plugin.git", "main"))
        .await
        .unwrap();
    fx.host
        .lifecycle
        .create(registry("Lights", "acme-lights", "0.4.2"))
        .await
        .unwrap();
    fx.host.lifecycle.build().await.unwrap();

    let layout = &fx.config.manifest;
    let base = ServiceManifest::load(&fx.config.service.root.join("pyproject.toml")).unwrap();
    let merged = ServiceManifest::load(&fx.bundle_manifest()).unwrap();
    let (lines, overrides) = ManifestEntries::read(merged.table(), layout)
        .added_since(&ManifestEntries::read(base.table(), layout));

    let mut packages: Vec<(String, Option<String>)> = lines
        .iter()
        .map(|line| {
            (
                line.package.clone(),
                line.pinned_version(&layout.pin_operator).map(str::to_string),
            )
        })
        .collect();
    packages.sort();
    assert_eq!(
        packages,
        vec![
            ("acme-lights".to_string(), Some("0.4.2".to_string())),
            ("weather-plugin".to_string(), None),
        ]
    );
    assert_eq!(overrides.len(), 1);
    assert_eq!(
        overrides["weather-plugin"],
        SourceOverride {
            git: "https://github.com/acme/weather-plugin.git".to_string(),
            branch: Some("main".to_string()),
        }
    );

    // The clean manifest is linked alongside under its original name
    let original = fx.config.bundle.dir.join("pyproject.original.toml");
    assert!(original.is_symlink());
    assert!(fx.dir.path().join("service").join("pyproject.toml").exists());
}
