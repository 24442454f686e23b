//! Git synchronization of remote working copies

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::GuardError;
use crate::models::environment::Environment;
use crate::remote::executor::{shell_quote, RemoteExecutor, Timeouts};
use crate::utils::sha256_hash;

/// Outcome of a successful sync
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    /// Remote HEAD before the sync
    pub previous_commit: String,

    /// Remote HEAD after the sync, equal to the target
    pub current_commit: String,

    /// True when the remote already matched and nothing was changed
    pub already_synced: bool,

    /// Checksum mismatches on critical files
    pub warnings: Vec<String>,
}

/// The local repository deployments are made from
#[async_trait]
pub trait WorkingCopy: Send + Sync {
    /// Full hash of the local HEAD
    async fn head_commit(&self) -> Result<String, GuardError>;

    /// Current branch name
    async fn branch(&self) -> Result<String, GuardError>;

    /// Whether `git status` reports local modifications
    async fn has_uncommitted_changes(&self) -> Result<bool, GuardError>;

    /// sha256 of a file relative to the repository root
    async fn file_digest(&self, relative: &str) -> Result<String, GuardError>;
}

/// Working copy backed by the local `git` binary
pub struct GitWorkingCopy {
    root: PathBuf,
}

impl GitWorkingCopy {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn git(&self, args: &[&str]) -> Result<String, GuardError> {
        let command = format!("git {}", args.join(" "));
        let output = Command::new("git")
            .current_dir(&self.root)
            .args(args)
            .output()
            .await
            .map_err(|e| GuardError::exec(&command, None, format!("Failed to run git: {}", e)))?;

        if !output.status.success() {
            return Err(GuardError::exec(
                command,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl WorkingCopy for GitWorkingCopy {
    async fn head_commit(&self) -> Result<String, GuardError> {
        self.git(&["rev-parse", "HEAD"]).await
    }

    async fn branch(&self) -> Result<String, GuardError> {
        self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    async fn has_uncommitted_changes(&self) -> Result<bool, GuardError> {
        let status = self.git(&["status", "--porcelain"]).await?;
        Ok(!status.is_empty())
    }

    async fn file_digest(&self, relative: &str) -> Result<String, GuardError> {
        let contents = tokio::fs::read(self.root.join(relative)).await?;
        Ok(sha256_hash(&contents))
    }
}

/// Brings remote working copies to a target commit
pub struct RepositorySynchronizer {
    executor: Arc<dyn RemoteExecutor>,
    working_copy: Arc<dyn WorkingCopy>,
    timeouts: Timeouts,
}

impl RepositorySynchronizer {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        working_copy: Arc<dyn WorkingCopy>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            executor,
            working_copy,
            timeouts,
        }
    }

    /// Read the remote HEAD commit
    pub async fn remote_head(&self, env: &Environment) -> Result<String, GuardError> {
        let command = format!("cd {} && git rev-parse HEAD", shell_quote(&env.path));
        let output = self
            .executor
            .execute(&env.target(), &command, self.timeouts.command)
            .await?;

        let head = output.first_line().to_string();
        if head.is_empty() {
            return Err(GuardError::Sync(format!(
                "Empty HEAD returned by {} in {}",
                env.host, env.path
            )));
        }
        Ok(head)
    }

    /// Make the remote HEAD equal `target_commit`
    ///
    /// Without `force_sync`, a remote that already matches is left untouched.
    /// After a reset the remote HEAD is read back and compared; a mismatch is
    /// a `Sync` error and needs manual intervention.
    pub async fn sync(
        &self,
        env: &Environment,
        target_commit: &str,
        force_sync: bool,
    ) -> Result<SyncResult, GuardError> {
        let previous = self.remote_head(env).await?;

        if commits_match(&previous, target_commit) && !force_sync {
            info!("{} already at {}, skipping sync", env.name, short(target_commit));
            return Ok(SyncResult {
                current_commit: previous.clone(),
                previous_commit: previous,
                already_synced: true,
                warnings: Vec::new(),
            });
        }

        info!(
            "Syncing {} from {} to {} ({})",
            env.name,
            short(&previous),
            short(target_commit),
            env.upstream_ref()
        );
        self.fetch_and_reset(env, &env.upstream_ref()).await?;

        let current = self.remote_head(env).await?;
        if !commits_match(&current, target_commit) {
            return Err(GuardError::Sync(format!(
                "Remote HEAD {} does not match target {} after reset to {}; push the target commit or reset manually",
                short(&current),
                short(target_commit),
                env.upstream_ref()
            )));
        }

        let warnings = self.verify_files(env).await;
        Ok(SyncResult {
            previous_commit: previous,
            current_commit: current,
            already_synced: false,
            warnings,
        })
    }

    /// Fetch and hard-reset to upstream without asserting a target
    pub async fn resync(&self, env: &Environment) -> Result<String, GuardError> {
        info!("Resyncing {} to {}", env.name, env.upstream_ref());
        self.fetch_and_reset(env, &env.upstream_ref()).await?;
        self.remote_head(env).await
    }

    /// Reset the remote working copy to the parent of its HEAD
    ///
    /// Returns `(from, to)`.
    pub async fn rollback_to_parent(&self, env: &Environment) -> Result<(String, String), GuardError> {
        let head = self.remote_head(env).await?;

        let command = format!("cd {} && git rev-parse HEAD~1", shell_quote(&env.path));
        let parent = match self
            .executor
            .execute(&env.target(), &command, self.timeouts.command)
            .await
        {
            Ok(output) => output.first_line().to_string(),
            Err(GuardError::Exec { stderr, .. }) => {
                return Err(GuardError::Sync(format!(
                    "Cannot resolve parent of {}: {}",
                    short(&head),
                    stderr
                )))
            }
            Err(e) => return Err(e),
        };

        info!("Rolling back {} from {} to {}", env.name, short(&head), short(&parent));
        let command = format!(
            "cd {} && git reset --hard {}",
            shell_quote(&env.path),
            shell_quote(&parent)
        );
        self.executor
            .execute(&env.target(), &command, self.timeouts.command)
            .await?;

        let current = self.remote_head(env).await?;
        if !commits_match(&current, &parent) {
            return Err(GuardError::Sync(format!(
                "Remote HEAD {} does not match rollback target {}",
                short(&current),
                short(&parent)
            )));
        }
        Ok((head, parent))
    }

    /// Compare critical file checksums; mismatches are warnings only
    pub async fn verify_files(&self, env: &Environment) -> Vec<String> {
        let mut warnings = Vec::new();

        for file in &env.critical_files {
            let local = match self.working_copy.file_digest(file).await {
                Ok(digest) => digest,
                Err(e) => {
                    warnings.push(format!("{}: local checksum unavailable: {}", file, e));
                    continue;
                }
            };

            let command = format!(
                "cd {} && sha256sum -- {}",
                shell_quote(&env.path),
                shell_quote(file)
            );
            let remote = match self
                .executor
                .execute(&env.target(), &command, self.timeouts.command)
                .await
            {
                Ok(output) => output
                    .first_line()
                    .split_whitespace()
                    .next()
                    .unwrap_or("")
                    .to_string(),
                Err(e) => {
                    warnings.push(format!("{}: remote checksum unavailable: {}", file, e));
                    continue;
                }
            };

            if local != remote {
                warn!("Checksum mismatch for {} on {}", file, env.name);
                warnings.push(format!(
                    "{}: checksum mismatch (local {}, remote {})",
                    file,
                    short(&local),
                    short(&remote)
                ));
            } else {
                debug!("Checksum ok for {} on {}", file, env.name);
            }
        }

        warnings
    }

    async fn fetch_and_reset(&self, env: &Environment, upstream: &str) -> Result<(), GuardError> {
        let path = shell_quote(&env.path);
        let fetch = format!("cd {} && git fetch {} --force", path, shell_quote(&env.remote));
        self.executor
            .execute(&env.target(), &fetch, self.timeouts.build)
            .await?;

        let reset = format!("cd {} && git reset --hard {}", path, shell_quote(upstream));
        self.executor
            .execute(&env.target(), &reset, self.timeouts.command)
            .await?;
        Ok(())
    }
}

/// Equal, or one is an abbreviation (7+ chars) of the other
pub fn commits_match(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    let (shorter, longer) = if a.len() < b.len() { (a, b) } else { (b, a) };
    shorter.len() >= 7 && longer.starts_with(shorter)
}

/// Abbreviated commit hash for log output
pub fn short(commit: &str) -> &str {
    commit.get(..8).unwrap_or(commit)
}
