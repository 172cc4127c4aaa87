//! Batch orchestration of exam attempts.
//!
//! Each topic runs through a two-phase protocol inside its own
//! environment: the agent drafts a working solution (verified by the
//! test command before it may be pushed), then redacts the solution
//! back out so the branch ends on a failing "problem" commit. Attempts
//! run concurrently under two independent bounds: sandbox slots (ports,
//! containers, disk) and API slots (LLM rate limits). An attempt error
//! never takes down its siblings; it becomes a failure record.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::agent::ExamAgent;
use crate::cancel::{CancelToken, StuckDetector};
use crate::checkpoint::TestOutcome;
use crate::env::{EnvironmentOptions, ExamEnvironment};
use crate::exam::{gen_id, AttemptFailure, CodingExam, Topic};
use crate::repo::GitRepository;
use crate::sandbox::SandboxFactory;

/// Decides whether a topic is worth turning into an exam. LLM-bearing
/// implementations run under the API semaphore.
#[async_trait]
pub trait TopicFilter: Send + Sync {
    async fn is_useful(&self, topic: &Topic) -> Result<bool>;
}

/// Default filter: every topic is attempted.
pub struct AcceptAll;

#[async_trait]
impl TopicFilter for AcceptAll {
    async fn is_useful(&self, _topic: &Topic) -> Result<bool> {
        Ok(true)
    }
}

/// Batch-level knobs, resolved from config by the caller.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub env: EnvironmentOptions,
    /// Workspace-relative file the agent writes the question to.
    pub question_file: String,
    pub sandbox_slots: usize,
    pub api_slots: usize,
    pub stuck_limit: u32,
}

/// Everything a batch produced: verified exams and per-topic failures.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub exams: Vec<CodingExam>,
    pub failures: Vec<AttemptFailure>,
}

pub struct Orchestrator {
    project: GitRepository,
    library: GitRepository,
    options: BatchOptions,
    factory: Arc<dyn SandboxFactory>,
    agent: Arc<dyn ExamAgent>,
    filter: Arc<dyn TopicFilter>,
}

impl Orchestrator {
    pub fn new(
        project: GitRepository,
        library: GitRepository,
        options: BatchOptions,
        factory: Arc<dyn SandboxFactory>,
        agent: Arc<dyn ExamAgent>,
        filter: Arc<dyn TopicFilter>,
    ) -> Self {
        Self {
            project,
            library,
            options,
            factory,
            agent,
            filter,
        }
    }

    /// Runs the whole batch. Per-topic ordering is unconstrained; every
    /// topic ends up in the report exactly once, as an exam or a failure.
    pub async fn generate(&self, topics: Vec<Topic>) -> BatchReport {
        info!(topics = topics.len(), "starting exam batch");
        let sandbox_slots = Arc::new(Semaphore::new(self.options.sandbox_slots));
        let api_slots = Arc::new(Semaphore::new(self.options.api_slots));
        let report = Arc::new(Mutex::new(BatchReport::default()));

        let mut tasks = JoinSet::new();
        for topic in topics {
            let project = self.project.clone();
            let library = self.library.clone();
            let options = self.options.clone();
            let factory = Arc::clone(&self.factory);
            let agent = Arc::clone(&self.agent);
            let filter = Arc::clone(&self.filter);
            let sandbox_slots = Arc::clone(&sandbox_slots);
            let api_slots = Arc::clone(&api_slots);
            let report = Arc::clone(&report);

            tasks.spawn(async move {
                let outcome = run_topic(
                    &topic,
                    project,
                    library,
                    &options,
                    factory.as_ref(),
                    agent.as_ref(),
                    filter.as_ref(),
                    &sandbox_slots,
                    &api_slots,
                )
                .await;

                let mut report = report.lock().await;
                match outcome {
                    Ok(Some(exam)) => {
                        info!(exam = %exam.id, topic = %topic.title, "exam recorded");
                        report.exams.push(exam);
                    }
                    Ok(None) => {
                        debug!(topic = %topic.title, "topic filtered out");
                        report.failures.push(AttemptFailure {
                            topic_title: topic.title.clone(),
                            reason: "filtered out as not useful".to_string(),
                        });
                    }
                    Err(e) => {
                        warn!(topic = %topic.title, error = %format!("{e:#}"), "attempt failed");
                        report.failures.push(AttemptFailure {
                            topic_title: topic.title.clone(),
                            reason: format!("{e:#}"),
                        });
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "attempt task panicked");
            }
        }

        let report = Arc::try_unwrap(report)
            .map(Mutex::into_inner)
            .unwrap_or_default();
        info!(
            exams = report.exams.len(),
            failures = report.failures.len(),
            "batch finished"
        );
        report
    }
}

/// One topic, end to end. `Ok(None)` means the filter rejected it.
#[allow(clippy::too_many_arguments)]
async fn run_topic(
    topic: &Topic,
    project: GitRepository,
    library: GitRepository,
    options: &BatchOptions,
    factory: &dyn SandboxFactory,
    agent: &dyn ExamAgent,
    filter: &dyn TopicFilter,
    sandbox_slots: &Semaphore,
    api_slots: &Semaphore,
) -> Result<Option<CodingExam>> {
    {
        let _api = api_slots.acquire().await?;
        if !filter.is_useful(topic).await? {
            return Ok(None);
        }
    }

    let _slot = sandbox_slots.acquire().await?;
    let exam = attempt_exam(topic, project, library, options, factory, agent).await?;
    Ok(Some(exam))
}

/// Runs one attempt inside a fresh environment, guaranteeing teardown on
/// every exit path.
async fn attempt_exam(
    topic: &Topic,
    project: GitRepository,
    library: GitRepository,
    options: &BatchOptions,
    factory: &dyn SandboxFactory,
    agent: &dyn ExamAgent,
) -> Result<CodingExam> {
    let exam_id = gen_id("exam");
    info!(exam = %exam_id, topic = %topic.title, "opening environment");

    let library_name = library.name().to_string();
    let project_name = project.name().to_string();
    let mut env =
        ExamEnvironment::open(&exam_id, project, library, &options.env, factory).await?;

    let result = run_phases(
        &env,
        &exam_id,
        topic,
        &project_name,
        &library_name,
        options,
        agent,
    )
    .await;

    if let Err(e) = env.close().await {
        // Never mask the attempt's own outcome with a teardown error.
        warn!(exam = %exam_id, error = %e, "environment close failed");
    }

    result
}

/// The two-phase protocol: draft a verified solution, then redact it.
async fn run_phases(
    env: &ExamEnvironment,
    exam_id: &str,
    topic: &Topic,
    project_name: &str,
    library_name: &str,
    options: &BatchOptions,
    agent: &dyn ExamAgent,
) -> Result<CodingExam> {
    let cancel = CancelToken::new();
    let mut stuck = StuckDetector::new(options.stuck_limit);

    // Phase 1: solution. The checkpoint verifies the tests before
    // anything may be pushed.
    let prompt = solution_prompt(topic, &options.question_file, library_name);
    let output = agent.run_turn(env.workdir()?, &prompt, &cancel).await?;
    if stuck.observe(&output) {
        warn!(exam = %exam_id, "agent output degenerate; cancelling attempt");
        cancel.cancel();
    }
    cancel
        .ensure_active()
        .context("solution phase aborted after degenerate agent output")?;

    let solution = env.push_exam("solution", true).await?;
    let Some(solution_commit) = solution.commit else {
        bail!("agent made no changes for the solution");
    };
    info!(exam = %exam_id, commit = %solution_commit, "solution drafted");

    // Phase 2: redaction. Verification is skipped; the problem commit is
    // supposed to fail the tests.
    let prompt = redaction_prompt(&options.question_file);
    let output = agent.run_turn(env.workdir()?, &prompt, &cancel).await?;
    if stuck.observe(&output) {
        warn!(exam = %exam_id, "agent output degenerate; cancelling attempt");
        cancel.cancel();
    }
    cancel
        .ensure_active()
        .context("redaction phase aborted after degenerate agent output")?;

    let problem = env.push_exam("problem", false).await?;
    let Some(problem_commit) = problem.commit else {
        // A no-diff redaction would ship a "problem" identical to the
        // solution, so it is a hard failure rather than a quiet skip.
        bail!("redaction produced no diff; problem would equal solution");
    };
    info!(exam = %exam_id, commit = %problem_commit, "problem redacted");

    let question = read_question(env, &options.question_file).await;

    Ok(CodingExam {
        id: exam_id.to_string(),
        image_name: options.env.image.clone(),
        project: project_name.to_string(),
        library: library_name.to_string(),
        solution_commit,
        problem_commit,
        question,
        topic_title: topic.title.clone(),
        created_at: Utc::now(),
    })
}

/// Reads the question the agent wrote; a missing file is an empty
/// question, not a failed attempt.
async fn read_question(env: &ExamEnvironment, question_file: &str) -> String {
    match env.read_file(std::path::Path::new(question_file)).await {
        Ok(text) => text,
        Err(e) => {
            warn!(file = question_file, error = %e, "question file unreadable; recording empty question");
            String::new()
        }
    }
}

fn solution_prompt(topic: &Topic, question_file: &str, library_name: &str) -> String {
    let anchor = topic
        .file_path
        .as_deref()
        .map(|p| format!("\nStart from `repositories/{library_name}/{p}`."))
        .unwrap_or_default();
    format!(
        "You are authoring a coding exam about: {title}\n\
         {description}\n\
         \n\
         The reference library is vendored at `repositories/{library_name}/`.{anchor}\n\
         \n\
         1. Write the exam question to `{question_file}`.\n\
         2. Implement a reference solution in this repository.\n\
         3. Add tests that the solution passes; `cargo test` must succeed.",
        title = topic.title,
        description = topic.description,
    )
}

fn redaction_prompt(question_file: &str) -> String {
    format!(
        "The reference solution in this repository is complete and its tests pass.\n\
         Now redact it: remove the solution implementation while keeping the tests\n\
         and `{question_file}` intact, so that the tests fail until a solver\n\
         reimplements the solution. Do not weaken or delete any test."
    )
}

/// Re-materializes an exam at its problem commit and lets the agent take
/// one solving turn, then reports the test outcome as data.
pub async fn solve_exam(
    exam: &CodingExam,
    project: GitRepository,
    library: GitRepository,
    options: &EnvironmentOptions,
    question_file: &str,
    factory: &dyn SandboxFactory,
    agent: &dyn ExamAgent,
) -> Result<TestOutcome> {
    let branch = gen_id("solve");
    info!(exam = %exam.id, %branch, "opening solve environment");
    let mut env = ExamEnvironment::open(&branch, project, library, options, factory).await?;

    let result = async {
        env.checkout(&exam.problem_commit).await?;
        // Re-materialize the canonical question text in case the
        // redaction turn touched it.
        if !exam.question.is_empty() {
            env.write_file(std::path::Path::new(question_file), &exam.question)
                .await?;
        }
        let cancel = CancelToken::new();
        let prompt = format!(
            "Solve this coding exam. Make the repository's tests pass.\n\n{}",
            exam.question
        );
        agent.run_turn(env.workdir()?, &prompt, &cancel).await?;
        Ok::<_, anyhow::Error>(env.run_test().await?)
    }
    .await;

    if let Err(e) = env.close().await {
        warn!(exam = %exam.id, error = %e, "environment close failed");
    }
    result
}
