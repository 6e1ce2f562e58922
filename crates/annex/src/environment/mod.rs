//! Bundled Environment
//!
//! Everything that touches the service manifest and the external resolver:
//!
//! - [`ServiceManifest`] locates the clean manifest and merges plugin
//!   dependencies into it
//! - [`ServiceTree`] links the service's source units into a directory
//! - [`ConflictProbe`] resolves a candidate set in a scratch directory
//! - [`EnvironmentBuilder`] materializes the bundled runtime

mod builder;
mod link;
mod manifest;
mod probe;
mod resolver;

pub use builder::{BuildError, BuildReport, EnvironmentBuilder};
pub use link::{LinkError, ServiceTree};
pub use manifest::{ManifestEntries, ManifestError, MergedManifest, ServiceManifest, original_name};
pub use probe::{ConflictProbe, ProbeError, ProbeOutcome};
pub use resolver::{
    CommandResolver, ResolveMode, ResolveOutput, Resolver, ResolverError, resolve_with_timeout,
    truncate_diagnostic,
};

#[cfg(all(test, unix))]
pub(crate) mod testing {
    //! Scripted resolver and a throwaway service project for unit tests

    use std::path::{Path, PathBuf};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::{ResolveMode, ResolveOutput, Resolver, ResolverError};
    use crate::config::AnnexConfig;

    #[derive(Debug, Clone)]
    pub struct Call {
        pub mode: ResolveMode,
        /// Manifest text at the time of the call
        pub manifest: String,
        pub cwd: PathBuf,
    }

    enum Rule {
        AcceptAll,
        RejectContaining { needle: String, diagnostic: String },
        FailInstall(String),
        Hang,
        HangInstall,
    }

    pub struct Scripted {
        rule: Rule,
        calls: Mutex<Vec<Call>>,
    }

    impl Scripted {
        fn with(rule: Rule) -> Self {
            Self {
                rule,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn accept_all() -> Self {
            Self::with(Rule::AcceptAll)
        }

        /// Reject any manifest whose text contains `needle`
        pub fn reject_containing(needle: &str, diagnostic: &str) -> Self {
            Self::with(Rule::RejectContaining {
                needle: needle.to_string(),
                diagnostic: diagnostic.to_string(),
            })
        }

        /// Plans succeed, lock/install fails
        pub fn fail_install(diagnostic: &str) -> Self {
            Self::with(Rule::FailInstall(diagnostic.to_string()))
        }

        pub fn hang() -> Self {
            Self::with(Rule::Hang)
        }

        /// Plans succeed, lock/install never returns
        pub fn hang_install() -> Self {
            Self::with(Rule::HangInstall)
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Resolver for Scripted {
        async fn resolve(
            &self,
            manifest: &Path,
            mode: ResolveMode,
            cwd: &Path,
        ) -> Result<ResolveOutput, ResolverError> {
            let text = std::fs::read_to_string(manifest).unwrap_or_default();
            self.calls.lock().push(Call {
                mode,
                manifest: text.clone(),
                cwd: cwd.to_path_buf(),
            });

            match &self.rule {
                Rule::AcceptAll => Ok(ResolveOutput::ok()),
                Rule::RejectContaining { needle, diagnostic } if text.contains(needle.as_str()) => {
                    Ok(ResolveOutput::failed(diagnostic.clone()))
                }
                Rule::RejectContaining { .. } => Ok(ResolveOutput::ok()),
                Rule::FailInstall(diagnostic) if mode == ResolveMode::LockAndInstall => {
                    Ok(ResolveOutput::failed(diagnostic.clone()))
                }
                Rule::FailInstall(_) => Ok(ResolveOutput::ok()),
                Rule::Hang => std::future::pending().await,
                Rule::HangInstall if mode == ResolveMode::LockAndInstall => {
                    std::future::pending().await
                }
                Rule::HangInstall => Ok(ResolveOutput::ok()),
            }
        }
    }

    /// Write a minimal service project into `root` and point a config at it
    pub fn service_config(root: &Path) -> AnnexConfig {
        std::fs::write(
            root.join("pyproject.toml"),
            "[project]\nname = \"svc\"\nversion = \"0.1.0\"\ndependencies = [\"fastapi>=0.110\"]\n",
        )
        .unwrap();
        std::fs::create_dir_all(root.join("src")).unwrap();

        let mut config = AnnexConfig::default();
        config.service.root = root.to_path_buf();
        config.resolver.timeout_secs = 5;
        config
    }
}
