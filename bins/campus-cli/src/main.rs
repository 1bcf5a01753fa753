mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "campus-cli")]
#[command(about = "Campus CLI - Grade exercises locally without the HTTP stack", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade a submission against an exercise and print the verdict
    Grade {
        /// Path to the exercise JSON file
        #[arg(short, long)]
        exercise: PathBuf,

        /// Path to the submission JSON file
        #[arg(short, long)]
        submission: PathBuf,
    },

    /// Run a submission once without grading (the "try it" flow)
    Run {
        /// Path to the exercise JSON file
        #[arg(short, long)]
        exercise: PathBuf,

        /// Path to the submission JSON file
        #[arg(short, long)]
        submission: PathBuf,

        /// Optional stdin fed to the run
        #[arg(short, long)]
        input: Option<String>,
    },

    /// List the languages code exercises may use
    Languages,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Grade {
            exercise,
            submission,
        } => {
            commands::grade(&exercise, &submission).await?;
        }
        Commands::Run {
            exercise,
            submission,
            input,
        } => {
            commands::run(&exercise, &submission, input.as_deref()).await?;
        }
        Commands::Languages => {
            commands::list_languages();
        }
    }

    Ok(())
}
