//! CLI command implementations.
//!
//! Each submodule implements one proctor command; shared wiring from
//! config to runtime objects (repos, sandbox factory, agent) lives here.

pub mod debug;
pub mod generate;
pub mod solve;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::agent::{ClaudeAgent, ExamAgent};
use crate::config::Config;
use crate::env::EnvironmentOptions;
use crate::repo::GitRepository;
use crate::sandbox::docker::DockerEngine;
use crate::sandbox::local::LocalEngine;
use crate::sandbox::ports::PortAllocator;
use crate::sandbox::SandboxFactory;

/// Opens the project and library repositories named in the config,
/// failing fast on missing or non-git paths.
pub fn open_repos(config: &Config) -> Result<(GitRepository, GitRepository)> {
    let project = GitRepository::open(&config.project.name, &config.project.dir)
        .context("project repository")?;
    let library = GitRepository::open(config.project.library_name(), &config.project.library_dir)
        .context("library repository")?;
    Ok((project, library))
}

/// Builds the sandbox backend the config names.
pub fn build_factory(config: &Config) -> Result<Arc<dyn SandboxFactory>> {
    match config.sandbox.engine.as_str() {
        "docker" => Ok(Arc::new(DockerEngine::new(
            Arc::new(PortAllocator::new()),
            Duration::from_secs(config.sandbox.health_timeout_secs),
        ))),
        "local" => Ok(Arc::new(LocalEngine)),
        other => bail!("Unknown sandbox engine: '{other}'. Supported: docker, local"),
    }
}

pub fn build_agent(config: &Config) -> Arc<dyn ExamAgent> {
    Arc::new(ClaudeAgent::new(config.agent.clone()))
}

/// Maps config onto per-attempt environment options.
pub fn env_options(config: &Config, image: &str, vendor_library: bool) -> EnvironmentOptions {
    EnvironmentOptions {
        image: image.to_string(),
        test_command: config.exam.test_command.clone(),
        vendor_library,
        platform: config.sandbox.platform,
        forward_env: config.sandbox.forward_env.clone(),
        enable_gpu: config.sandbox.enable_gpu,
        vllm_port: config.sandbox.vllm_port,
    }
}
