//! `proctor debug`: stand up an environment, keep it alive for manual
//! inspection, and tear it down on Ctrl-C.

use anyhow::{bail, Result};
use colored::Colorize;
use tracing::info;

use crate::config::Config;
use crate::env::ExamEnvironment;
use crate::exam::{self, gen_id};

use super::{build_factory, env_options, open_repos};

pub async fn run(config: Config, exam_id: Option<String>) -> Result<()> {
    let (project, library) = open_repos(&config)?;
    let factory = build_factory(&config)?;

    // With an exam id, inspect that exam at its solution commit;
    // otherwise stand up a fresh environment on the project HEAD.
    let (image, checkout_ref) = match &exam_id {
        Some(id) => {
            let exams = exam::load_exams(&config.exam.output_file)?;
            let Some(record) = exam::find_exam(&exams, id) else {
                bail!("Exam '{}' not found in {}", id, config.exam.output_file.display());
            };
            (record.image_name.clone(), Some(record.solution_commit.clone()))
        }
        None => (config.exam.image.clone(), None),
    };

    let branch = gen_id("debug");
    let options = env_options(&config, &image, true);
    let mut env =
        ExamEnvironment::open(&branch, project, library, &options, factory.as_ref()).await?;

    let result = async {
        if let Some(reference) = checkout_ref {
            env.checkout(&reference).await?;
        }

        let head = env.cloned_repo()?.rev_parse("HEAD").await?;
        println!("\n{}", "━".repeat(50).dimmed());
        println!("{}", "   Debug environment ready".yellow().bold());
        println!("{}", "━".repeat(50).dimmed());
        println!("  Workspace:  {}", env.workdir()?.display().to_string().cyan());
        println!("  HEAD:       {}", head.cyan());
        println!(
            "  Container:  {}",
            "docker ps --filter name=proctor-sandbox".cyan()
        );
        println!(
            "  Attach:     {}",
            "docker exec -it <container> bash".cyan()
        );
        println!("\n  Press {} to tear down.", "Ctrl-C".green().bold());

        tokio::signal::ctrl_c().await?;
        info!("interrupt received; tearing down debug environment");
        Ok::<_, anyhow::Error>(())
    }
    .await;

    env.close().await?;
    result
}
