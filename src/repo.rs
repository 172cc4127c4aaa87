//! Validated handle to an on-disk git repository.
//!
//! `GitRepository` verifies at construction time that the path is a real
//! git working tree, so every later operation can assume a valid repo.
//! All git subprocess failures surface through a single `GitError`
//! taxonomy with captured output.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

/// Errors from git repository validation and operations.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    /// The repository path does not exist on disk.
    #[error("repository path does not exist: {path}")]
    PathMissing { path: PathBuf },

    /// The path exists but is not a git working tree.
    #[error("not a git working tree: {path} ({detail})")]
    NotAWorkingTree { path: PathBuf, detail: String },

    /// A git subprocess exited nonzero.
    #[error("git {command} failed: {}", if stderr.is_empty() { stdout } else { stderr })]
    CommandFailed {
        command: String,
        stdout: String,
        stderr: String,
    },

    /// Spawning git or touching the filesystem failed.
    #[error("io error during git operation: {0}")]
    Io(#[from] std::io::Error),
}

/// A named, validated reference to an existing git working tree.
///
/// Immutable after construction. Cloning the handle is cheap and keeps
/// the validation invariant (the underlying directory was a working tree
/// when `open` succeeded).
#[derive(Debug, Clone)]
pub struct GitRepository {
    name: String,
    local_dir: PathBuf,
}

impl GitRepository {
    /// Opens a repository handle, eagerly validating the working tree.
    ///
    /// Fails immediately if the path is missing or `git rev-parse
    /// --git-dir` rejects it, never lazily on first use.
    pub fn open(name: impl Into<String>, local_dir: impl Into<PathBuf>) -> Result<Self, GitError> {
        let local_dir = local_dir.into();
        if !local_dir.exists() {
            return Err(GitError::PathMissing { path: local_dir });
        }

        let probe = Command::new("git")
            .current_dir(&local_dir)
            .args(["rev-parse", "--git-dir"])
            .output()?;
        if !probe.status.success() {
            return Err(GitError::NotAWorkingTree {
                path: local_dir,
                detail: String::from_utf8_lossy(&probe.stderr).trim().to_string(),
            });
        }

        Ok(Self {
            name: name.into(),
            local_dir,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    /// Whether the working tree directory still exists on disk.
    pub fn exists(&self) -> bool {
        self.local_dir.exists()
    }

    /// Runs a git subcommand in the working tree, returning trimmed stdout.
    pub async fn run_git(&self, args: &[&str]) -> Result<String, GitError> {
        debug!(repo = %self.name, ?args, "running git");
        let output = tokio::process::Command::new("git")
            .current_dir(&self.local_dir)
            .args(args)
            .output()
            .await?;

        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: args.join(" "),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Checks out a ref, optionally creating it as a new branch.
    pub async fn checkout(&self, reference: &str, create: bool) -> Result<(), GitError> {
        if create {
            self.run_git(&["checkout", "-b", reference]).await?;
        } else {
            self.run_git(&["checkout", reference]).await?;
        }
        Ok(())
    }

    /// Stages all changes in the working tree.
    pub async fn add_all(&self) -> Result<(), GitError> {
        self.run_git(&["add", "."]).await?;
        Ok(())
    }

    /// Commits staged changes with the given message.
    pub async fn commit(&self, message: &str) -> Result<(), GitError> {
        self.run_git(&["commit", "-m", message]).await?;
        Ok(())
    }

    /// Pushes a branch to a remote.
    pub async fn push(&self, remote: &str, branch: &str) -> Result<(), GitError> {
        self.run_git(&["push", remote, branch]).await?;
        Ok(())
    }

    /// Resolves a ref to its full commit hash.
    pub async fn rev_parse(&self, reference: &str) -> Result<String, GitError> {
        self.run_git(&["rev-parse", reference]).await
    }

    /// Porcelain status output; empty means a clean tree.
    pub async fn status_porcelain(&self) -> Result<String, GitError> {
        self.run_git(&["status", "--porcelain"]).await
    }

    /// Sets a repo-local commit identity so commits work without relying
    /// on the host's global git config.
    pub async fn set_identity(&self, name: &str, email: &str) -> Result<(), GitError> {
        self.run_git(&["config", "user.name", name]).await?;
        self.run_git(&["config", "user.email", email]).await?;
        Ok(())
    }

    /// Recursively grants full access on the working tree so a non-root
    /// container user can write into the bind mount.
    pub fn make_writable_by_all(&self) -> Result<(), GitError> {
        grant_all_access(&self.local_dir)?;
        Ok(())
    }
}

#[cfg(unix)]
fn grant_all_access(root: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o777))?;
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o777))?;
            }
            // Symlinks are left alone; chmod would follow them out of the tree.
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn grant_all_access(_root: &Path) -> std::io::Result<()> {
    Ok(())
}
