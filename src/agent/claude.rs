//! Claude Code agent backend.
//!
//! Invokes the Claude CLI in print mode:
//! ```bash
//! claude -p --dangerously-skip-permissions --model opus --output-format text
//! ```
//!
//! The prompt is piped via stdin.
//!
//! See: https://docs.anthropic.com/en/docs/claude-code

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::ExamAgent;
use crate::cancel::CancelToken;
use crate::config::AgentConfig;

/// Claude Code CLI agent.
pub struct ClaudeAgent {
    config: AgentConfig,
}

impl ClaudeAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ExamAgent for ClaudeAgent {
    fn name(&self) -> &'static str {
        "Claude"
    }

    async fn run_turn(
        &self,
        workdir: &Path,
        prompt: &str,
        cancel: &CancelToken,
    ) -> Result<String> {
        cancel.ensure_active()?;

        let claude_path = &self.config.path;
        info!("Running Claude agent: {}", claude_path);
        debug!("Workdir: {}", workdir.display());

        // claude -p [--dangerously-skip-permissions] [--model model] [--output-format format]
        let mut args = vec!["-p".to_string()];

        if self.config.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }

        if let Some(ref model) = self.config.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        args.push("--output-format".to_string());
        args.push(self.config.output_format.clone());

        debug!("Claude args: {:?}", args);

        // Claude reads the prompt from stdin.
        let mut child = tokio::process::Command::new(claude_path)
            .current_dir(workdir)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| {
                format!(
                    "Failed to run Claude agent '{}'. \n\
                     \n\
                     Make sure Claude Code CLI is installed:\n\
                     - Install: npm install -g @anthropic-ai/claude-code\n\
                     \n\
                     Configure the path in proctor.toml:\n\
                     [agent]\n\
                     path = \"claude\"  # Default\n\
                     path = \"/full/path/to/claude\"  # Custom path",
                    claude_path
                )
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.flush().await?;
        }

        let output = child.wait_with_output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);

            if stderr.contains("command not found") || stderr.contains("No such file") {
                anyhow::bail!(
                    "Claude agent '{}' not found.\n\
                     \n\
                     Install Claude Code CLI:\n\
                     - npm install -g @anthropic-ai/claude-code\n\
                     \n\
                     Or configure the path in proctor.toml:\n\
                     [agent]\n\
                     path = \"/full/path/to/claude\"",
                    claude_path
                );
            }

            warn!("Agent stderr: {}", stderr);
            warn!("Agent stdout: {}", stdout);
            anyhow::bail!(
                "Claude agent failed with exit code {:?}:\n{}",
                output.status.code(),
                stderr
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        info!("Claude agent turn completed");
        debug!("Output length: {} bytes", stdout.len());

        Ok(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claude_agent_name() {
        let agent = ClaudeAgent::new(AgentConfig::default());
        assert_eq!(agent.name(), "Claude");
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let agent = ClaudeAgent::new(AgentConfig::default());
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = agent
            .run_turn(Path::new("/tmp"), "prompt", &cancel)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }
}
