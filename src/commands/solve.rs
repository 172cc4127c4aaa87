//! `proctor solve`: re-materialize an exam at its problem commit, let
//! the agent attempt it, and report the test outcome.

use anyhow::{bail, Result};
use colored::Colorize;

use crate::config::Config;
use crate::exam;
use crate::orchestrator::solve_exam;

use super::{build_agent, build_factory, env_options, open_repos};

pub async fn run(config: Config, exam_id: &str, no_library: bool) -> Result<()> {
    let exams = exam::load_exams(&config.exam.output_file)?;
    let Some(record) = exam::find_exam(&exams, exam_id) else {
        bail!(
            "Exam '{}' not found in {}",
            exam_id,
            config.exam.output_file.display()
        );
    };

    let (project, library) = open_repos(&config)?;
    let factory = build_factory(&config)?;
    let agent = build_agent(&config);
    let options = env_options(&config, &record.image_name, !no_library);

    let outcome = solve_exam(
        record,
        project,
        library,
        &options,
        &config.exam.question_file,
        factory.as_ref(),
        agent.as_ref(),
    )
    .await?;

    println!("\n{}", "━".repeat(50).dimmed());
    println!("  Exam:    {}", record.id.cyan());
    println!("  Topic:   {}", record.topic_title.cyan());
    if outcome.success {
        println!("  Result:  {}", "solved (tests pass)".green().bold());
    } else {
        println!("  Result:  {}", "unsolved (tests fail)".red().bold());
        let output = outcome.output();
        let tail: String = output
            .lines()
            .rev()
            .take(20)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("\n");
        println!("{}", tail.dimmed());
    }
    println!("{}", "━".repeat(50).dimmed());

    Ok(())
}
