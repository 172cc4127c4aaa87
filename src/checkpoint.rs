//! Test-gated commit/push checkpoints.
//!
//! A checkpoint marks a phase boundary in exam generation: stage
//! everything, optionally verify with the project's test command, then
//! commit and push the workspace branch. The core invariant is that
//! verification runs *before* the commit: a pushed commit either passed
//! the tests at push time or verification was explicitly skipped (as for
//! the intentionally-broken problem checkpoint).

use std::path::Path;

use tracing::{debug, info, warn};

use crate::repo::GitError;
use crate::workspace::{TemporalWorkspace, WorkspaceError};

/// Remote that checkpoint pushes target.
const CHECKPOINT_REMOTE: &str = "origin";

/// Result of a checkpoint. `commit: None` means the working tree had no
/// changes, an expected outcome rather than an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub commit: Option<String>,
}

impl Checkpoint {
    pub fn empty() -> Self {
        Self { commit: None }
    }
}

/// Outcome of running the project's test command. Test failure is data
/// at this boundary, not an exceptional condition.
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl TestOutcome {
    /// Combined stdout + stderr, for logs and failure records.
    pub fn output(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Errors from the checkpoint protocol.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// The test command exited nonzero; nothing was committed or pushed
    /// and the working tree is left dirty for inspection.
    #[error("verification failed before commit: {stderr}")]
    VerificationFailed { stdout: String, stderr: String },

    /// The test command itself could not be parsed or spawned.
    #[error("could not run test command '{command}': {detail}")]
    TestCommand { command: String, detail: String },

    /// Staging, committing, or pushing failed.
    #[error("commit/push failed: {0}")]
    CommitPush(#[source] GitError),

    /// The workspace was not usable (e.g. setup never ran).
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

/// Runs a shell-style test command with the working directory set to
/// `dir`, capturing output. Success is a zero exit code.
pub async fn run_test_command(dir: &Path, command: &str) -> Result<TestOutcome, CheckpointError> {
    let words = shell_words::split(command).map_err(|e| CheckpointError::TestCommand {
        command: command.to_string(),
        detail: e.to_string(),
    })?;
    let Some((program, args)) = words.split_first() else {
        return Err(CheckpointError::TestCommand {
            command: command.to_string(),
            detail: "empty command".to_string(),
        });
    };

    debug!(%command, dir = %dir.display(), "running test command");
    let output = tokio::process::Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| CheckpointError::TestCommand {
            command: command.to_string(),
            detail: e.to_string(),
        })?;

    Ok(TestOutcome {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Stages, verifies, commits, and pushes the workspace branch.
///
/// Returns `Checkpoint { commit: None }` when the tree has no changes.
/// With `run_verification`, a failing test command aborts before any
/// commit exists; the dirty tree is preserved.
pub async fn checkpoint(
    workspace: &TemporalWorkspace,
    message: &str,
    run_verification: bool,
    test_command: &str,
) -> Result<Checkpoint, CheckpointError> {
    let repo = workspace.cloned_repo()?;
    info!(branch = %workspace.branch_name(), %message, run_verification, "checkpointing");

    repo.add_all().await.map_err(CheckpointError::CommitPush)?;
    let status = repo
        .status_porcelain()
        .await
        .map_err(CheckpointError::CommitPush)?;
    if status.is_empty() {
        warn!(branch = %workspace.branch_name(), "no changes to checkpoint");
        return Ok(Checkpoint::empty());
    }

    if run_verification {
        let outcome = run_test_command(repo.local_dir(), test_command).await?;
        if !outcome.success {
            warn!(branch = %workspace.branch_name(), "verification failed; leaving tree dirty");
            return Err(CheckpointError::VerificationFailed {
                stdout: outcome.stdout,
                stderr: outcome.stderr,
            });
        }
    }

    repo.commit(message)
        .await
        .map_err(CheckpointError::CommitPush)?;
    repo.push(CHECKPOINT_REMOTE, workspace.branch_name())
        .await
        .map_err(CheckpointError::CommitPush)?;
    let hash = repo
        .rev_parse("HEAD")
        .await
        .map_err(CheckpointError::CommitPush)?;

    info!(branch = %workspace.branch_name(), commit = %hash, "checkpoint pushed");
    Ok(Checkpoint { commit: Some(hash) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::GitRepository;
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

    /// Builds an origin + a set-up workspace cloned from it.
    async fn fixture_workspace() -> Option<(TempDir, TempDir, TemporalWorkspace)> {
        let origin = TempDir::new().unwrap();
        init_repo(origin.path())?;
        let library_dir = TempDir::new().unwrap();
        init_repo(library_dir.path())?;

        let project = GitRepository::open("project", origin.path()).unwrap();
        let library = GitRepository::open("numrs", library_dir.path()).unwrap();
        let mut ws = TemporalWorkspace::new("exam-checkpoint", project, library);
        ws.setup(false).await.unwrap();
        Some((origin, library_dir, ws))
    }

    fn origin_has_branch(origin: &Path, branch: &str) -> bool {
        std::process::Command::new("git")
            .current_dir(origin)
            .args(["rev-parse", "--verify", branch])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn clean_tree_yields_empty_checkpoint_and_no_push() {
        let Some((origin, _lib, mut ws)) = fixture_workspace().await else {
            return;
        };

        let result = checkpoint(&ws, "noop", true, "true").await.unwrap();
        assert_eq!(result, Checkpoint::empty());
        assert!(!origin_has_branch(origin.path(), "exam-checkpoint"));

        ws.cleanup().unwrap();
    }

    #[tokio::test]
    async fn diff_with_passing_tests_pushes_full_hash() {
        let Some((origin, _lib, mut ws)) = fixture_workspace().await else {
            return;
        };

        std::fs::write(ws.dir().unwrap().join("solution.rs"), "// solution\n").unwrap();
        let result = checkpoint(&ws, "solution", true, "true").await.unwrap();

        let hash = result.commit.expect("commit hash expected");
        assert_eq!(hash.len(), 40);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(origin_has_branch(origin.path(), "exam-checkpoint"));
        assert!(ws
            .cloned_repo()
            .unwrap()
            .status_porcelain()
            .await
            .unwrap()
            .is_empty());

        ws.cleanup().unwrap();
    }

    #[tokio::test]
    async fn failing_verification_commits_nothing_and_leaves_tree_dirty() {
        let Some((origin, _lib, mut ws)) = fixture_workspace().await else {
            return;
        };

        let head_before = ws.cloned_repo().unwrap().rev_parse("HEAD").await.unwrap();
        std::fs::write(ws.dir().unwrap().join("broken.rs"), "// broken\n").unwrap();

        let err = checkpoint(&ws, "broken", true, "false").await.unwrap_err();
        assert!(matches!(err, CheckpointError::VerificationFailed { .. }));

        let repo = ws.cloned_repo().unwrap();
        assert_eq!(repo.rev_parse("HEAD").await.unwrap(), head_before);
        assert!(!repo.status_porcelain().await.unwrap().is_empty());
        assert!(!origin_has_branch(origin.path(), "exam-checkpoint"));

        ws.cleanup().unwrap();
    }

    #[tokio::test]
    async fn skipping_verification_pushes_a_broken_tree() {
        let Some((origin, _lib, mut ws)) = fixture_workspace().await else {
            return;
        };

        std::fs::write(ws.dir().unwrap().join("problem.rs"), "// redacted\n").unwrap();
        // "false" would fail verification, but the problem checkpoint
        // skips it by design.
        let result = checkpoint(&ws, "problem", false, "false").await.unwrap();
        assert!(result.commit.is_some());
        assert!(origin_has_branch(origin.path(), "exam-checkpoint"));

        ws.cleanup().unwrap();
    }

    #[tokio::test]
    async fn run_test_command_reports_failure_as_data() {
        let dir = TempDir::new().unwrap();
        let ok = run_test_command(dir.path(), "true").await.unwrap();
        assert!(ok.success);
        let bad = run_test_command(dir.path(), "false").await.unwrap();
        assert!(!bad.success);
    }

    #[tokio::test]
    async fn run_test_command_rejects_empty_command() {
        let dir = TempDir::new().unwrap();
        let err = run_test_command(dir.path(), "   ").await.unwrap_err();
        assert!(matches!(err, CheckpointError::TestCommand { .. }));
    }

    #[tokio::test]
    async fn checkpoint_before_setup_fails_fast() {
        let origin = TempDir::new().unwrap();
        if init_repo(origin.path()).is_none() {
            return;
        }
        let project = GitRepository::open("project", origin.path()).unwrap();
        let library = project.clone();

        let ws = TemporalWorkspace::new("exam-early", project, library);
        let err = checkpoint(&ws, "msg", false, "true").await.unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::Workspace(WorkspaceError::NotSetUp { .. })
        ));
    }
}
