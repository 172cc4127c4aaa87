use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod agent;
mod cancel;
mod checkpoint;
mod commands;
mod config;
mod env;
mod exam;
mod orchestrator;
mod repo;
mod sandbox;
mod workspace;

use config::Config;

#[derive(Parser)]
#[command(name = "proctor")]
#[command(
    author,
    version,
    about = "Generate and verify AI coding exams in ephemeral sandboxes"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate exams for the configured topics
    Generate {
        /// Cap the number of topics attempted (overrides config)
        #[arg(short, long)]
        max_topics: Option<usize>,
    },

    /// Have the agent attempt a recorded exam from its problem commit
    Solve {
        /// Exam id, as recorded in the output file
        exam_id: String,

        /// Do not vendor the reference library into the workspace
        #[arg(long)]
        no_library: bool,
    },

    /// Stand up an exam environment and keep it alive for inspection
    Debug {
        /// Exam id to inspect at its solution commit (fresh HEAD if omitted)
        exam_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("proctor=debug")
    } else {
        EnvFilter::new("proctor=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let cwd = std::env::current_dir()?;
    let config = Config::load(&cwd)?;

    match cli.command {
        Commands::Generate { max_topics } => {
            commands::generate::run(config, max_topics).await?;
        }
        Commands::Solve {
            exam_id,
            no_library,
        } => {
            commands::solve::run(config, &exam_id, no_library).await?;
        }
        Commands::Debug { exam_id } => {
            commands::debug::run(config, exam_id).await?;
        }
    }

    Ok(())
}
