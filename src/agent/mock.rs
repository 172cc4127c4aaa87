//! Scripted agent for tests.
//!
//! Plays back a fixed sequence of responses, writing each response's
//! files into the workspace the way a real agent would edit them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use super::ExamAgent;
use crate::cancel::CancelToken;

#[derive(Debug, Clone)]
pub enum MockResponse {
    /// A productive turn: text output plus workspace file edits.
    Success {
        output: String,
        files: Vec<(PathBuf, String)>,
    },
    /// A turn with no usable content.
    Degenerate,
}

impl MockResponse {
    pub fn text(output: impl Into<String>) -> Self {
        Self::Success {
            output: output.into(),
            files: Vec::new(),
        }
    }

    pub fn with_file(
        output: impl Into<String>,
        path: impl Into<PathBuf>,
        contents: impl Into<String>,
    ) -> Self {
        Self::Success {
            output: output.into(),
            files: vec![(path.into(), contents.into())],
        }
    }
}

/// Agent that replays scripted responses in order. Turns past the end of
/// the script are degenerate.
pub struct ScriptedAgent {
    responses: Mutex<Vec<MockResponse>>,
    turns: Arc<AtomicUsize>,
}

impl ScriptedAgent {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        let mut responses = responses;
        responses.reverse(); // pop() plays front-to-back
        Self {
            responses: Mutex::new(responses),
            turns: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn turns_taken(&self) -> usize {
        self.turns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExamAgent for ScriptedAgent {
    fn name(&self) -> &'static str {
        "Scripted"
    }

    async fn run_turn(
        &self,
        workdir: &Path,
        _prompt: &str,
        cancel: &CancelToken,
    ) -> Result<String> {
        cancel.ensure_active()?;
        self.turns.fetch_add(1, Ordering::SeqCst);

        let next = self.responses.lock().unwrap().pop();
        match next {
            Some(MockResponse::Success { output, files }) => {
                for (path, contents) in files {
                    let target = workdir.join(path);
                    if let Some(parent) = target.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(target, contents)?;
                }
                Ok(output)
            }
            Some(MockResponse::Degenerate) | None => Ok("[no text content]".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn plays_responses_in_order_and_writes_files() {
        let dir = TempDir::new().unwrap();
        let agent = ScriptedAgent::new(vec![
            MockResponse::with_file("wrote solution", "src/solution.rs", "// sol\n"),
            MockResponse::text("done"),
        ]);
        let cancel = CancelToken::new();

        let first = agent.run_turn(dir.path(), "p1", &cancel).await.unwrap();
        assert_eq!(first, "wrote solution");
        assert!(dir.path().join("src/solution.rs").exists());

        let second = agent.run_turn(dir.path(), "p2", &cancel).await.unwrap();
        assert_eq!(second, "done");
        assert_eq!(agent.turns_taken(), 2);
    }

    #[tokio::test]
    async fn exhausted_script_goes_degenerate() {
        let dir = TempDir::new().unwrap();
        let agent = ScriptedAgent::new(vec![]);
        let cancel = CancelToken::new();
        let out = agent.run_turn(dir.path(), "p", &cancel).await.unwrap();
        assert_eq!(out, "[no text content]");
    }

    #[tokio::test]
    async fn cancelled_token_refuses_turn() {
        let dir = TempDir::new().unwrap();
        let agent = ScriptedAgent::new(vec![MockResponse::text("unreached")]);
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(agent.run_turn(dir.path(), "p", &cancel).await.is_err());
        assert_eq!(agent.turns_taken(), 0);
    }
}
