use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::sandbox::Platform;

const CONFIG_FILE: &str = "proctor.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub exam: ExamConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

/// The project repository exams are generated in, and the reference
/// library vendored into each workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Path to the project git repository.
    #[serde(default = "default_project_dir")]
    pub dir: PathBuf,

    /// Project name used in exam records.
    #[serde(default = "default_project_name")]
    pub name: String,

    /// Path to the reference library git repository. The library's
    /// directory name doubles as its name.
    #[serde(default = "default_library_dir")]
    pub library_dir: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            dir: default_project_dir(),
            name: default_project_name(),
            library_dir: default_library_dir(),
        }
    }
}

impl ProjectConfig {
    /// Library name derived from the directory's final component.
    pub fn library_name(&self) -> String {
        self.library_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "library".to_string())
    }
}

fn default_project_dir() -> PathBuf {
    PathBuf::from("../rust-benchmarks")
}

fn default_project_name() -> String {
    "rust-benchmarks".to_string()
}

fn default_library_dir() -> PathBuf {
    PathBuf::from("repositories/numrs")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamConfig {
    /// Sandbox image to run exam attempts in.
    #[serde(default = "default_image")]
    pub image: String,

    /// Maximum number of topics to attempt in one batch.
    #[serde(default = "default_max_topics")]
    pub max_topics: usize,

    /// Test command gating the solution checkpoint.
    #[serde(default = "default_test_command")]
    pub test_command: String,

    /// File the agent writes the question to, workspace-relative.
    #[serde(default = "default_question_file")]
    pub question_file: String,

    /// Topic input file.
    #[serde(default = "default_topics_file")]
    pub topics_file: PathBuf,

    /// Where completed exam records are written.
    #[serde(default = "default_output_file")]
    pub output_file: PathBuf,

    /// Where failed-attempt records are written.
    #[serde(default = "default_failures_file")]
    pub failures_file: PathBuf,
}

impl Default for ExamConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            max_topics: default_max_topics(),
            test_command: default_test_command(),
            question_file: default_question_file(),
            topics_file: default_topics_file(),
            output_file: default_output_file(),
            failures_file: default_failures_file(),
        }
    }
}

fn default_image() -> String {
    "ohserver-rust".to_string()
}

fn default_max_topics() -> usize {
    3
}

fn default_test_command() -> String {
    "cargo test".to_string()
}

fn default_question_file() -> String {
    "README.md".to_string()
}

fn default_topics_file() -> PathBuf {
    PathBuf::from("topics.json")
}

fn default_output_file() -> PathBuf {
    PathBuf::from("exams.json")
}

fn default_failures_file() -> PathBuf {
    PathBuf::from("failures.json")
}

/// Concurrency bounds. Sandbox slots are scarce (ports, containers,
/// disk) while API slots are rate-limit-bound, so they are tuned
/// independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Concurrent sandbox-bearing exam attempts.
    #[serde(default = "default_sandbox_slots")]
    pub sandbox_slots: usize,

    /// Concurrent LLM-call-bearing operations (topic filtering).
    #[serde(default = "default_api_slots")]
    pub api_slots: usize,

    /// Degenerate agent turns tolerated before cancelling an attempt.
    #[serde(default = "default_stuck_limit")]
    pub stuck_limit: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            sandbox_slots: default_sandbox_slots(),
            api_slots: default_api_slots(),
            stuck_limit: default_stuck_limit(),
        }
    }
}

fn default_sandbox_slots() -> usize {
    5
}

fn default_api_slots() -> usize {
    3
}

fn default_stuck_limit() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Backend: "docker" or "local".
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Platform override; auto-detected from the host when unset.
    #[serde(default)]
    pub platform: Option<Platform>,

    /// Seconds to wait for the container health check.
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,

    /// Environment variable names forwarded into the container when set.
    #[serde(default)]
    pub forward_env: Vec<String>,

    /// Request all host GPUs.
    #[serde(default)]
    pub enable_gpu: bool,

    /// Host port of a local inference server to expose to the container.
    #[serde(default)]
    pub vllm_port: Option<u16>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            platform: None,
            health_timeout_secs: default_health_timeout(),
            forward_env: Vec::new(),
            enable_gpu: false,
            vllm_port: None,
        }
    }
}

fn default_engine() -> String {
    "docker".to_string()
}

fn default_health_timeout() -> u64 {
    120
}

/// Agent CLI configuration (Claude Code style).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Path to the agent CLI.
    #[serde(default = "default_agent_path")]
    pub path: String,

    /// Model to use (optional).
    #[serde(default)]
    pub model: Option<String>,

    /// Skip permission prompts (required for autonomous operation).
    #[serde(default = "default_true")]
    pub skip_permissions: bool,

    /// Output format for non-interactive mode.
    #[serde(default = "default_output_format")]
    pub output_format: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            path: default_agent_path(),
            model: None,
            skip_permissions: true,
            output_format: default_output_format(),
        }
    }
}

fn default_agent_path() -> String {
    "claude".to_string()
}

fn default_output_format() -> String {
    "text".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file, using defaults if not found.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }
}
