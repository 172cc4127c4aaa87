//! Temporary, branch-scoped working copies of a project repository.
//!
//! A `TemporalWorkspace` clones the project into a fresh temp directory,
//! checks out an isolated branch, and optionally vendors the reference
//! library under `repositories/<name>/`. It exclusively owns that temp
//! directory until `cleanup()` deletes it.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::repo::{GitError, GitRepository};

/// Subdirectory of the workspace where reference libraries are vendored.
pub const LIBRARY_VENDOR_DIR: &str = "repositories";

/// Commit identity applied to every workspace clone.
const COMMIT_NAME: &str = "proctor";
const COMMIT_EMAIL: &str = "proctor@localhost";

/// Errors from workspace lifecycle operations.
///
/// Project-clone and library-clone failures are distinct so callers can
/// tell "can't get the project" from "can't get the reference library".
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// Cloning the project repository failed.
    #[error("project clone failed: {output}")]
    Clone { output: String },

    /// Cloning the reference library into the workspace failed.
    #[error("library clone failed for '{library}': {output}")]
    LibraryClone { library: String, output: String },

    /// A git operation was attempted before `setup()` completed.
    #[error("workspace '{branch}' is not set up; call setup() first")]
    NotSetUp { branch: String },

    /// Deleting the workspace directory failed.
    #[error("workspace cleanup failed: {source}")]
    Cleanup {
        #[source]
        source: std::io::Error,
    },

    /// An underlying git operation failed.
    #[error(transparent)]
    Git(#[from] GitError),
}

/// A cloned, branch-isolated copy of the project repository.
///
/// Lifecycle: `new` → `setup()` → checkpoint operations → `cleanup()`.
/// Callers must treat this as a scoped resource and guarantee `cleanup()`
/// on every exit path; a failed `setup()` does not self-heal partial
/// state, keeping failure diagnosis simple.
#[derive(Debug)]
pub struct TemporalWorkspace {
    branch_name: String,
    project: GitRepository,
    library: GitRepository,
    cloned: Option<GitRepository>,
}

impl TemporalWorkspace {
    pub fn new(
        branch_name: impl Into<String>,
        project: GitRepository,
        library: GitRepository,
    ) -> Self {
        Self {
            branch_name: branch_name.into(),
            project,
            library,
            cloned: None,
        }
    }

    pub fn branch_name(&self) -> &str {
        &self.branch_name
    }

    /// The cloned repository, or `NotSetUp` before `setup()` succeeds.
    pub fn cloned_repo(&self) -> Result<&GitRepository, WorkspaceError> {
        self.cloned.as_ref().ok_or_else(|| WorkspaceError::NotSetUp {
            branch: self.branch_name.clone(),
        })
    }

    /// The workspace directory on disk.
    pub fn dir(&self) -> Result<&Path, WorkspaceError> {
        Ok(self.cloned_repo()?.local_dir())
    }

    pub fn is_set_up(&self) -> bool {
        self.cloned.is_some()
    }

    /// Clones the project, creates the isolated branch, optionally vendors
    /// the library, and opens up permissions for the container user.
    ///
    /// Each sub-step aborts setup on failure; partially created
    /// directories are the caller's responsibility (`cleanup()` handles
    /// them once `cloned` is populated).
    pub async fn setup(&mut self, vendor_library: bool) -> Result<(), WorkspaceError> {
        info!(
            branch = %self.branch_name,
            project = %self.project.name(),
            vendor_library,
            "setting up temporal workspace"
        );

        let temp_dir = std::env::temp_dir().join(format!("proctor-{}", uuid::Uuid::new_v4()));
        debug!(src = %self.project.local_dir().display(), dst = %temp_dir.display(), "cloning project");
        git_clone(self.project.local_dir(), &temp_dir)
            .await
            .map_err(|output| WorkspaceError::Clone { output })?;

        let cloned = GitRepository::open(format!("{}-cloned", self.project.name()), &temp_dir)?;
        cloned.set_identity(COMMIT_NAME, COMMIT_EMAIL).await?;
        cloned.checkout(&self.branch_name, true).await?;
        self.cloned = Some(cloned);

        if vendor_library {
            self.vendor_library().await?;
        }

        // Checked-out files default to the cloning user's umask; the
        // container runs as a different non-root uid.
        self.cloned_repo()?.make_writable_by_all()?;

        info!(branch = %self.branch_name, dir = %temp_dir.display(), "workspace ready");
        Ok(())
    }

    async fn vendor_library(&self) -> Result<(), WorkspaceError> {
        let vendor_root = self.dir()?.join(LIBRARY_VENDOR_DIR);
        std::fs::create_dir_all(&vendor_root).map_err(GitError::Io)?;
        let target = vendor_root.join(self.library.name());
        debug!(library = %self.library.name(), dst = %target.display(), "vendoring library");
        git_clone(self.library.local_dir(), &target)
            .await
            .map_err(|output| WorkspaceError::LibraryClone {
                library: self.library.name().to_string(),
                output,
            })
    }

    /// Checks out an arbitrary commit or branch in the clone.
    ///
    /// Checkout can reset file modes, so permissive access is re-applied.
    pub async fn checkout(&self, reference: &str) -> Result<(), WorkspaceError> {
        let repo = self.cloned_repo()?;
        repo.checkout(reference, false).await?;
        repo.make_writable_by_all()?;
        Ok(())
    }

    /// Deletes the workspace directory. Idempotent: no-ops when the
    /// directory is already gone or setup never ran.
    pub fn cleanup(&mut self) -> Result<(), WorkspaceError> {
        let Some(cloned) = self.cloned.take() else {
            return Ok(());
        };
        if !cloned.exists() {
            return Ok(());
        }
        info!(dir = %cloned.local_dir().display(), "removing temporal workspace");
        std::fs::remove_dir_all(cloned.local_dir()).map_err(|source| {
            warn!(dir = %cloned.local_dir().display(), error = %source, "workspace cleanup failed");
            WorkspaceError::Cleanup { source }
        })
    }
}

/// Clones `src` into `dst`, returning combined output on failure.
async fn git_clone(src: &Path, dst: &Path) -> Result<(), String> {
    let output = tokio::process::Command::new("git")
        .arg("clone")
        .arg(src)
        .arg(dst)
        .output()
        .await
        .map_err(|e| e.to_string())?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        Err(if stderr.is_empty() {
            stdout.to_string()
        } else {
            stderr.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init_repo(dir: &Path) -> Option<()> {
        let run = |args: &[&str]| {
            std::process::Command::new("git")
                .current_dir(dir)
                .args(args)
                .output()
                .ok()
                .filter(|o| o.status.success())
        };
        run(&["init", "-q"])?;
        run(&["config", "user.name", "test"])?;
        run(&["config", "user.email", "test@localhost"])?;
        std::fs::write(dir.join("lib.rs"), "// fixture\n").ok()?;
        run(&["add", "."])?;
        run(&["commit", "-q", "-m", "initial"])?;
        Some(())
    }

    fn fixture_pair() -> Option<(TempDir, GitRepository, TempDir, GitRepository)> {
        let project_dir = TempDir::new().unwrap();
        init_repo(project_dir.path())?;
        let library_dir = TempDir::new().unwrap();
        init_repo(library_dir.path())?;
        let project = GitRepository::open("project", project_dir.path()).unwrap();
        let library = GitRepository::open("numrs", library_dir.path()).unwrap();
        Some((project_dir, project, library_dir, library))
    }

    #[tokio::test]
    async fn setup_clones_and_checks_out_branch() {
        let Some((_p, project, _l, library)) = fixture_pair() else {
            return;
        };

        let mut ws = TemporalWorkspace::new("exam-abc", project, library);
        ws.setup(false).await.unwrap();

        let repo = ws.cloned_repo().unwrap();
        assert!(repo.local_dir().exists());
        let branch = repo.run_git(&["branch", "--show-current"]).await.unwrap();
        assert_eq!(branch, "exam-abc");

        ws.cleanup().unwrap();
    }

    #[tokio::test]
    async fn setup_vendors_library_under_conventional_path() {
        let Some((_p, project, _l, library)) = fixture_pair() else {
            return;
        };

        let mut ws = TemporalWorkspace::new("exam-lib", project, library);
        ws.setup(true).await.unwrap();

        let vendored = ws.dir().unwrap().join(LIBRARY_VENDOR_DIR).join("numrs");
        assert!(vendored.join("lib.rs").exists());

        ws.cleanup().unwrap();
    }

    #[tokio::test]
    async fn operations_before_setup_fail_fast() {
        let Some((_p, project, _l, library)) = fixture_pair() else {
            return;
        };

        let ws = TemporalWorkspace::new("exam-early", project, library);
        let err = ws.cloned_repo().unwrap_err();
        assert!(matches!(err, WorkspaceError::NotSetUp { .. }));
        let err = ws.checkout("HEAD").await.unwrap_err();
        assert!(matches!(err, WorkspaceError::NotSetUp { .. }));
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let Some((_p, project, _l, library)) = fixture_pair() else {
            return;
        };

        let mut ws = TemporalWorkspace::new("exam-clean", project, library);
        ws.setup(false).await.unwrap();
        let dir = ws.dir().unwrap().to_path_buf();
        assert!(dir.exists());

        ws.cleanup().unwrap();
        assert!(!dir.exists());
        // Second call must be a no-op, not an error.
        ws.cleanup().unwrap();
        assert!(!ws.is_set_up());
    }

    #[tokio::test]
    async fn setup_from_vanished_project_surfaces_clone_error() {
        let Some((project_dir, project, _l, library)) = fixture_pair() else {
            return;
        };

        // Delete the source after validating the handle: the clone step
        // fails and its captured output lands in the Clone variant.
        drop(project_dir);
        let mut ws = TemporalWorkspace::new("exam-missing", project, library);
        let err = ws.setup(false).await.unwrap_err();
        match err {
            WorkspaceError::Clone { output } => assert!(!output.is_empty()),
            other => panic!("expected Clone error, got {other:?}"),
        }
        assert!(!ws.is_set_up());
    }

    #[tokio::test]
    async fn checkout_previous_commit_and_back() {
        let Some((_p, project, _l, library)) = fixture_pair() else {
            return;
        };

        let mut ws = TemporalWorkspace::new("exam-hist", project, library);
        ws.setup(false).await.unwrap();

        let repo = ws.cloned_repo().unwrap();
        let first = repo.rev_parse("HEAD").await.unwrap();
        std::fs::write(ws.dir().unwrap().join("more.rs"), "// more\n").unwrap();
        repo.add_all().await.unwrap();
        repo.commit("second").await.unwrap();
        let second = repo.rev_parse("HEAD").await.unwrap();
        assert_ne!(first, second);

        ws.checkout(&first).await.unwrap();
        let repo = ws.cloned_repo().unwrap();
        assert_eq!(repo.rev_parse("HEAD").await.unwrap(), first);

        ws.cleanup().unwrap();
    }
}
