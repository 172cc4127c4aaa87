//! Agent backends that drive the exam-authoring turns.
//!
//! An [`ExamAgent`] takes a prompt and a workspace directory, does its
//! work by editing files in that directory, and returns its textual
//! output. The orchestrator only inspects the text for degenerate-output
//! detection; the real results are the file edits.

mod claude;

#[cfg(test)]
pub mod mock;

pub use claude::ClaudeAgent;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::cancel::CancelToken;

/// An AI coding agent invoked once per exam phase.
#[async_trait]
pub trait ExamAgent: Send + Sync {
    /// Agent name for display and logs.
    fn name(&self) -> &'static str;

    /// Runs one turn: the agent works inside `workdir` and returns its
    /// text output. Implementations check `cancel` before doing work.
    async fn run_turn(&self, workdir: &Path, prompt: &str, cancel: &CancelToken)
        -> Result<String>;
}
