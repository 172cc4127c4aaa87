//! The complete per-attempt environment: workspace + sandbox.
//!
//! `ExamEnvironment::open` composes a branch-scoped workspace clone with
//! a started sandbox mounted on it, and `close` tears both down in
//! order. Every attempt owns exactly one environment; nothing here is
//! shared between attempts.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::checkpoint::{self, Checkpoint, CheckpointError, TestOutcome};
use crate::repo::GitRepository;
use crate::sandbox::error::SandboxError;
use crate::sandbox::{Platform, Sandbox, SandboxFactory, SandboxSpec};
use crate::workspace::{TemporalWorkspace, WorkspaceError};

/// Hostname the engine maps to the host gateway.
const HOST_GATEWAY_NAME: &str = "host.docker.internal";

/// Container-side build cache locations. The cargo paths are the
/// sandbox image's CARGO_HOME, not the container user's home.
const CARGO_REGISTRY_MOUNT: &str = "/usr/local/cargo/registry";
const CARGO_GIT_MOUNT: &str = "/usr/local/cargo/git";
const SCCACHE_DIR: &str = "/var/tmp/sccache";

#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Per-attempt sandbox settings, resolved from config by the caller.
#[derive(Debug, Clone)]
pub struct EnvironmentOptions {
    /// Sandbox image to run.
    pub image: String,
    /// Test command gating verified checkpoints.
    pub test_command: String,
    /// Clone the reference library into the workspace.
    pub vendor_library: bool,
    /// Platform override; host-detected when unset.
    pub platform: Option<Platform>,
    /// Environment variable names forwarded into the sandbox when set.
    pub forward_env: Vec<String>,
    /// Request all host GPUs.
    pub enable_gpu: bool,
    /// Host port of a local inference server the sandbox should reach.
    pub vllm_port: Option<u16>,
}

impl EnvironmentOptions {
    pub fn new(image: impl Into<String>, test_command: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            test_command: test_command.into(),
            vendor_library: true,
            platform: None,
            forward_env: Vec::new(),
            enable_gpu: false,
            vllm_port: None,
        }
    }
}

/// A live environment: set-up workspace plus started sandbox.
///
/// Obtained via [`ExamEnvironment::open`]; callers must call `close()`
/// on every exit path. `close()` is idempotent and keeps going past a
/// sandbox stop failure so the workspace directory is always removed.
pub struct ExamEnvironment {
    workspace: TemporalWorkspace,
    sandbox: Box<dyn Sandbox>,
    test_command: String,
    closed: bool,
}

impl std::fmt::Debug for ExamEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExamEnvironment")
            .field("workspace", &self.workspace)
            .field("sandbox", &self.sandbox.name())
            .field("test_command", &self.test_command)
            .field("closed", &self.closed)
            .finish()
    }
}

impl ExamEnvironment {
    /// Sets up the workspace and starts the sandbox on top of it.
    ///
    /// If the sandbox fails to start, the workspace is cleaned up before
    /// the error propagates: a failed open leaves nothing behind.
    pub async fn open(
        branch_name: &str,
        project: GitRepository,
        library: GitRepository,
        options: &EnvironmentOptions,
        factory: &dyn SandboxFactory,
    ) -> Result<Self, EnvError> {
        let mut workspace = TemporalWorkspace::new(branch_name, project, library);
        workspace.setup(options.vendor_library).await?;

        let spec = build_spec(&workspace, options)?;
        let mut sandbox = factory.create(spec);
        if let Err(e) = sandbox.start().await {
            warn!(branch = %branch_name, error = %e, "sandbox start failed; cleaning workspace");
            if let Err(cleanup) = workspace.cleanup() {
                warn!(error = %cleanup, "workspace cleanup after failed start also failed");
            }
            return Err(e.into());
        }

        info!(branch = %branch_name, backend = sandbox.name(), "environment open");
        Ok(Self {
            workspace,
            sandbox,
            test_command: options.test_command.clone(),
            closed: false,
        })
    }

    pub fn cloned_repo(&self) -> Result<&GitRepository, EnvError> {
        Ok(self.workspace.cloned_repo()?)
    }

    pub fn workdir(&self) -> Result<&Path, EnvError> {
        Ok(self.workspace.dir()?)
    }

    /// Checks out a commit or branch in the workspace clone.
    pub async fn checkout(&self, reference: &str) -> Result<(), EnvError> {
        Ok(self.workspace.checkout(reference).await?)
    }

    /// Stages, optionally verifies, commits, and pushes the branch.
    pub async fn push_exam(
        &self,
        message: &str,
        run_verification: bool,
    ) -> Result<Checkpoint, EnvError> {
        Ok(checkpoint::checkpoint(
            &self.workspace,
            message,
            run_verification,
            &self.test_command,
        )
        .await?)
    }

    /// Reads a workspace-relative file through the sandbox.
    pub async fn read_file(&self, path: &Path) -> Result<String, EnvError> {
        Ok(self.sandbox.read_file(path).await?)
    }

    /// Writes a workspace-relative file through the sandbox.
    pub async fn write_file(&self, path: &Path, contents: &str) -> Result<(), EnvError> {
        Ok(self.sandbox.write_file(path, contents).await?)
    }

    /// Runs the environment's test command inside the sandbox.
    pub async fn run_test(&self) -> Result<TestOutcome, EnvError> {
        let words =
            shell_words::split(&self.test_command).map_err(|e| CheckpointError::TestCommand {
                command: self.test_command.clone(),
                detail: e.to_string(),
            })?;
        let output = self.sandbox.execute(&words).await?;
        Ok(TestOutcome {
            success: output.success(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// Stops the sandbox, then deletes the workspace. Idempotent.
    ///
    /// A stop failure is logged, not returned: the workspace removal must
    /// still run so a wedged container never strands a temp directory.
    pub async fn close(&mut self) -> Result<(), EnvError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        debug!(branch = %self.workspace.branch_name(), "closing environment");
        if let Err(e) = self.sandbox.stop().await {
            warn!(error = %e, "sandbox stop failed during close");
        }
        self.workspace.cleanup()?;
        Ok(())
    }
}

/// Maps options onto a concrete sandbox spec for this workspace.
fn build_spec(
    workspace: &TemporalWorkspace,
    options: &EnvironmentOptions,
) -> Result<SandboxSpec, EnvError> {
    let mut spec = SandboxSpec::new(&options.image, workspace.dir()?);
    if let Some(platform) = options.platform {
        spec.platform = platform;
    }
    spec.forward_env = options.forward_env.clone();
    spec.extra_mounts = build_cache_mounts();
    spec.expose_aux_ports = true;
    spec.enable_gpu = options.enable_gpu;

    if let Some(port) = options.vllm_port {
        apply_vllm_passthrough(&mut spec, port);
    }

    Ok(spec)
}

/// Points the sandbox at a host-side inference server through the
/// engine's gateway alias.
fn apply_vllm_passthrough(spec: &mut SandboxSpec, port: u16) {
    spec.enable_host_gateway = true;
    spec.extra_env
        .insert("VLLM_HOST".to_string(), HOST_GATEWAY_NAME.to_string());
    spec.extra_env.insert("VLLM_PORT".to_string(), port.to_string());
}

/// Host build caches shared with the sandbox: the cargo registry and git
/// caches when present, plus a world-writable sccache dir that is created
/// on demand.
fn build_cache_mounts() -> BTreeMap<String, String> {
    cache_mounts(dirs::home_dir(), Path::new(SCCACHE_DIR))
}

fn cache_mounts(home: Option<std::path::PathBuf>, sccache: &Path) -> BTreeMap<String, String> {
    let mut mounts = BTreeMap::new();

    if let Some(home) = home {
        let registry = home.join(".cargo").join("registry");
        if registry.is_dir() {
            mounts.insert(
                registry.to_string_lossy().to_string(),
                CARGO_REGISTRY_MOUNT.to_string(),
            );
        }
        let git_cache = home.join(".cargo").join("git");
        if git_cache.is_dir() {
            mounts.insert(
                git_cache.to_string_lossy().to_string(),
                CARGO_GIT_MOUNT.to_string(),
            );
        }
    }

    if ensure_sccache_dir(sccache) {
        mounts.insert(sccache.to_string_lossy().to_string(), SCCACHE_DIR.to_string());
    }

    mounts
}

/// Creates the shared sccache dir if missing and opens it to the
/// container user. Failure skips the mount rather than failing the open.
fn ensure_sccache_dir(dir: &Path) -> bool {
    if !dir.is_dir() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!(dir = %dir.display(), error = %e, "could not create sccache dir; skipping mount");
            return false;
        }
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o777)) {
            warn!(dir = %dir.display(), error = %e, "could not chmod sccache dir");
        }
    }
    dir.is_dir()
}
