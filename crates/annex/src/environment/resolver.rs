// External Resolver - The dependency resolver treated as an opaque command
//
// Only the exit status and the raw diagnostic text matter. Callers bound every
// invocation with a timeout; dropping the future kills the child process.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::ResolverConfig;

/// Which resolver step to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// Compute a resolution plan without installing anything
    PlanOnly,
    /// Lock, then install/sync
    LockAndInstall,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOutput {
    pub success: bool,
    /// Raw error output (stdout when stderr is empty)
    pub diagnostic: String,
}

impl ResolveOutput {
    pub fn ok() -> Self {
        Self {
            success: true,
            diagnostic: String::new(),
        }
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self {
            success: false,
            diagnostic: diagnostic.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("failed to run resolver `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("resolver timed out after {0:?}")]
    TimedOut(Duration),
}

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Run the resolver against `manifest` with `cwd` as working directory
    async fn resolve(
        &self,
        manifest: &Path,
        mode: ResolveMode,
        cwd: &Path,
    ) -> Result<ResolveOutput, ResolverError>;
}

/// Run `resolver.resolve` bounded by `timeout`
pub async fn resolve_with_timeout(
    resolver: &dyn Resolver,
    manifest: &Path,
    mode: ResolveMode,
    cwd: &Path,
    timeout: Duration,
) -> Result<ResolveOutput, ResolverError> {
    match tokio::time::timeout(timeout, resolver.resolve(manifest, mode, cwd)).await {
        Ok(result) => result,
        Err(_) => Err(ResolverError::TimedOut(timeout)),
    }
}

/// Truncate a diagnostic on a char boundary so it can be stored safely
pub fn truncate_diagnostic(text: &str, max_len: usize) -> String {
    let text = text.trim();
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &text[..end])
}

// ─────────────────────────────────────────────────────────────────────────────
// Command resolver
// ─────────────────────────────────────────────────────────────────────────────

/// Resolver backed by an external program (`uv` by default).
///
/// Arguments may contain `{manifest}`, replaced with the manifest path.
#[derive(Debug, Clone)]
pub struct CommandResolver {
    program: String,
    plan_args: Vec<String>,
    lock_args: Vec<String>,
    sync_args: Vec<String>,
}

impl CommandResolver {
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            program: config.program.clone(),
            plan_args: config.plan_args.clone(),
            lock_args: config.lock_args.clone(),
            sync_args: config.sync_args.clone(),
        }
    }

    async fn run(
        &self,
        args: &[String],
        manifest: &Path,
        cwd: &Path,
    ) -> Result<ResolveOutput, ResolverError> {
        let manifest = manifest.to_string_lossy();
        let args: Vec<String> = args
            .iter()
            .map(|arg| arg.replace("{manifest}", &manifest))
            .collect();

        tracing::debug!("Running {} {:?} in {}", self.program, args, cwd.display());

        let output = Command::new(&self.program)
            .args(&args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ResolverError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            return Ok(ResolveOutput::ok());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let diagnostic = if stderr.trim().is_empty() {
            String::from_utf8_lossy(&output.stdout).into_owned()
        } else {
            stderr.into_owned()
        };
        let diagnostic = if diagnostic.trim().is_empty() {
            format!("{} {} exited with {}", self.program, args.join(" "), output.status)
        } else {
            diagnostic
        };
        Ok(ResolveOutput::failed(diagnostic))
    }
}

#[async_trait]
impl Resolver for CommandResolver {
    async fn resolve(
        &self,
        manifest: &Path,
        mode: ResolveMode,
        cwd: &Path,
    ) -> Result<ResolveOutput, ResolverError> {
        match mode {
            ResolveMode::PlanOnly => self.run(&self.plan_args, manifest, cwd).await,
            ResolveMode::LockAndInstall => {
                let locked = self.run(&self.lock_args, manifest, cwd).await?;
                if !locked.success {
                    return Ok(locked);
                }
                self.run(&self.sync_args, manifest, cwd).await
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shell(plan: &str, lock: &str, sync: &str) -> CommandResolver {
        let args = |script: &str| vec!["-c".to_string(), script.to_string()];
        CommandResolver::new(&ResolverConfig {
            program: "sh".to_string(),
            plan_args: args(plan),
            lock_args: args(lock),
            sync_args: args(sync),
            ..ResolverConfig::default()
        })
    }

    #[tokio::test]
    async fn test_plan_success() {
        let dir = TempDir::new().unwrap();
        let resolver = shell("exit 0", "exit 1", "exit 1");
        let output = resolver
            .resolve(&dir.path().join("pyproject.toml"), ResolveMode::PlanOnly, dir.path())
            .await
            .unwrap();
        assert!(output.success);
    }

    #[tokio::test]
    async fn test_failure_captures_stderr() {
        let dir = TempDir::new().unwrap();
        let resolver = shell("echo 'no solution for acme' >&2; exit 1", "", "");
        let output = resolver
            .resolve(&dir.path().join("pyproject.toml"), ResolveMode::PlanOnly, dir.path())
            .await
            .unwrap();
        assert!(!output.success);
        assert!(output.diagnostic.contains("no solution for acme"));
    }

    #[tokio::test]
    async fn test_lock_failure_skips_sync() {
        let dir = TempDir::new().unwrap();
        let resolver = shell("exit 0", "echo locked > lock.txt; exit 1", "echo synced > sync.txt");
        let output = resolver
            .resolve(
                &dir.path().join("pyproject.toml"),
                ResolveMode::LockAndInstall,
                dir.path(),
            )
            .await
            .unwrap();
        assert!(!output.success);
        assert!(dir.path().join("lock.txt").exists());
        assert!(!dir.path().join("sync.txt").exists());
    }

    #[tokio::test]
    async fn test_manifest_placeholder() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("pyproject.toml");
        std::fs::write(&manifest, "").unwrap();
        let resolver = shell("test -f {manifest}", "", "");
        let output = resolver
            .resolve(&manifest, ResolveMode::PlanOnly, dir.path())
            .await
            .unwrap();
        assert!(output.success);
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = TempDir::new().unwrap();
        let resolver = shell("sleep 5", "", "");
        let err = resolve_with_timeout(
            &resolver,
            &dir.path().join("pyproject.toml"),
            ResolveMode::PlanOnly,
            dir.path(),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ResolverError::TimedOut(_)));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = TempDir::new().unwrap();
        let resolver = CommandResolver::new(&ResolverConfig {
            program: "annex-no-such-resolver".to_string(),
            ..ResolverConfig::default()
        });
        let err = resolver
            .resolve(&dir.path().join("pyproject.toml"), ResolveMode::PlanOnly, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::Spawn { .. }));
    }

    #[test]
    fn test_truncate_diagnostic() {
        assert_eq!(truncate_diagnostic("  short  ", 10), "short");
        let long = "é".repeat(10);
        let truncated = truncate_diagnostic(&long, 5);
        assert!(truncated.starts_with("éé"));
        assert!(truncated.ends_with("(truncated)"));
    }
}
