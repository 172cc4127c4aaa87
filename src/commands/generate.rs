//! `proctor generate`: run a batch of exam attempts and persist the
//! results.

use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use tracing::info;

use crate::config::Config;
use crate::exam;
use crate::orchestrator::{AcceptAll, BatchOptions, Orchestrator};

use super::{build_agent, build_factory, env_options, open_repos};

pub async fn run(config: Config, max_topics: Option<usize>) -> Result<()> {
    let (project, library) = open_repos(&config)?;
    let factory = build_factory(&config)?;
    let agent = build_agent(&config);

    let mut topics = exam::load_topics(&config.exam.topics_file)?;
    let cap = max_topics.unwrap_or(config.exam.max_topics);
    if topics.len() > cap {
        info!(total = topics.len(), cap, "capping topic list");
        topics.truncate(cap);
    }
    if topics.is_empty() {
        println!("\n{} No topics to attempt.", "ℹ".blue());
        return Ok(());
    }

    let options = BatchOptions {
        env: env_options(&config, &config.exam.image, true),
        question_file: config.exam.question_file.clone(),
        sandbox_slots: config.limits.sandbox_slots,
        api_slots: config.limits.api_slots,
        stuck_limit: config.limits.stuck_limit,
    };
    let orchestrator = Orchestrator::new(
        project,
        library,
        options,
        factory,
        agent,
        Arc::new(AcceptAll),
    );

    let report = orchestrator.generate(topics).await;

    // Append to the existing record sets rather than clobbering them.
    let mut exams = exam::load_exams(&config.exam.output_file)?;
    exams.extend(report.exams.iter().cloned());
    exam::save_exams(&config.exam.output_file, &exams)
        .context("Failed to persist exam records")?;
    if !report.failures.is_empty() {
        let mut failures = exam::load_failures(&config.exam.failures_file)?;
        failures.extend(report.failures.iter().cloned());
        exam::save_failures(&config.exam.failures_file, &failures)
            .context("Failed to persist failure records")?;
    }

    println!("\n{}", "━".repeat(50).dimmed());
    println!("{}", "   Exam batch summary".yellow().bold());
    println!("{}", "━".repeat(50).dimmed());
    println!(
        "  Recorded:  {}",
        report.exams.len().to_string().green().bold()
    );
    for exam in &report.exams {
        println!(
            "    {} {} ({})",
            "✓".green(),
            exam.id.cyan(),
            exam.topic_title
        );
    }
    println!(
        "  Failed:    {}",
        report.failures.len().to_string().red().bold()
    );
    for failure in &report.failures {
        println!(
            "    {} {}: {}",
            "✗".red(),
            failure.topic_title.cyan(),
            failure.reason
        );
    }
    println!(
        "  Saved to:  {}",
        config.exam.output_file.display().to_string().cyan()
    );
    println!("{}", "━".repeat(50).dimmed());

    Ok(())
}
