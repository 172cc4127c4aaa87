//! Local-process sandbox backend.
//!
//! Runs commands directly on the host with the workspace as the working
//! directory. No isolation, no ports, no engine required, useful for
//! environments without a container engine and for fast smoke runs.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use super::error::SandboxError;
use super::{ExecOutput, Sandbox, SandboxFactory, SandboxSpec};

/// Creates [`LocalSandbox`] instances.
#[derive(Debug, Default, Clone)]
pub struct LocalEngine;

impl SandboxFactory for LocalEngine {
    fn create(&self, spec: SandboxSpec) -> Box<dyn Sandbox> {
        Box::new(LocalSandbox::new(spec))
    }
}

/// Runs workspace commands as plain host processes.
#[derive(Debug)]
pub struct LocalSandbox {
    spec: SandboxSpec,
    started: bool,
}

impl LocalSandbox {
    pub fn new(spec: SandboxSpec) -> Self {
        Self {
            spec,
            started: false,
        }
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn start(&mut self) -> Result<(), SandboxError> {
        debug!(dir = %self.spec.mount_dir.display(), "local sandbox ready");
        self.started = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SandboxError> {
        self.started = false;
        Ok(())
    }

    async fn execute(&self, command: &[String]) -> Result<ExecOutput, SandboxError> {
        if !self.started {
            return Err(SandboxError::NotStarted);
        }
        let Some((program, args)) = command.split_first() else {
            return Err(SandboxError::exec("empty command"));
        };

        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(&self.spec.mount_dir)
            .envs(self.spec.extra_env.clone())
            .output()
            .await
            .map_err(|e| SandboxError::exec(e.to_string()))?;

        Ok(ExecOutput {
            exit_code: i64::from(output.status.code().unwrap_or(-1)),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn read_file(&self, path: &Path) -> Result<String, SandboxError> {
        if !self.started {
            return Err(SandboxError::NotStarted);
        }
        tokio::fs::read_to_string(self.spec.mount_dir.join(path))
            .await
            .map_err(|e| SandboxError::file_io(e.to_string()))
    }

    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), SandboxError> {
        if !self.started {
            return Err(SandboxError::NotStarted);
        }
        let target = self.spec.mount_dir.join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SandboxError::file_io(e.to_string()))?;
        }
        tokio::fs::write(target, contents)
            .await
            .map_err(|e| SandboxError::file_io(e.to_string()))
    }
}
