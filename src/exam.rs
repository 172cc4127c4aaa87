//! Exam records: inputs (topics) and outputs (verified exams).
//!
//! A `CodingExam` pairs two pushed commits on the exam's branch: a
//! `solution_commit` that passed the test command, and a later
//! `problem_commit` where the solution has been redacted back out. The
//! exam is solvable by reapplying work on top of the problem commit
//! until the solution commit's tests pass again.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A subject the batch should author an exam about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub title: String,
    pub description: String,
    /// Library file the topic is anchored to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

/// A completed, verified exam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodingExam {
    /// Unique id; doubles as the branch name.
    pub id: String,
    /// Sandbox image the exam was authored (and should be solved) in.
    pub image_name: String,
    pub project: String,
    pub library: String,
    /// Commit where the tests pass.
    pub solution_commit: String,
    /// Commit where the solution is redacted; the exam's starting point.
    pub problem_commit: String,
    /// The question text presented to a solver.
    pub question: String,
    pub topic_title: String,
    pub created_at: DateTime<Utc>,
}

/// Record of an attempt that did not produce an exam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub topic_title: String,
    pub reason: String,
}

/// Generates a unique id like `exam-1a2b3c4d`.
pub fn gen_id(prefix: &str) -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &uuid[..8])
}

/// Loads the topic list from a JSON file.
pub fn load_topics(path: &Path) -> Result<Vec<Topic>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read topics file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse topics file: {}", path.display()))
}

/// Loads previously saved exams; a missing file is an empty list.
pub fn load_exams(path: &Path) -> Result<Vec<CodingExam>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read exams file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse exams file: {}", path.display()))
}

/// Writes the exam list as pretty-printed JSON.
pub fn save_exams(path: &Path, exams: &[CodingExam]) -> Result<()> {
    let json = serde_json::to_string_pretty(exams)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write exams file: {}", path.display()))
}

/// Loads previously recorded failures; a missing file is an empty list.
pub fn load_failures(path: &Path) -> Result<Vec<AttemptFailure>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read failures file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse failures file: {}", path.display()))
}

/// Writes the failure list as pretty-printed JSON.
pub fn save_failures(path: &Path, failures: &[AttemptFailure]) -> Result<()> {
    let json = serde_json::to_string_pretty(failures)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write failures file: {}", path.display()))
}

/// Finds an exam by id.
pub fn find_exam<'a>(exams: &'a [CodingExam], id: &str) -> Option<&'a CodingExam> {
    exams.iter().find(|e| e.id == id)
}
