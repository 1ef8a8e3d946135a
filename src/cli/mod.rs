pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use self::config::OutputFormat;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to a file (the per-user data directory when no path is given)
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<Option<PathBuf>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scraping job
    Run {
        /// Job description (YAML)
        #[arg(required = true)]
        config: PathBuf,

        /// Directory for the output files, overriding the job's output_dir
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Output format (json, csv)
        #[arg(short, long)]
        format: Option<OutputFormat>,

        /// Maximum number of pages to fetch
        #[arg(short, long)]
        max_pages: Option<usize>,

        /// Print the summary without writing output files
        #[arg(long)]
        no_save: bool,
    },

    /// Check a job description without running it
    Validate {
        #[arg(required = true)]
        config: PathBuf,
    },

    /// Write an example job description
    Sample {
        #[arg(default_value = "sample_job.yaml")]
        path: PathBuf,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            config,
            output_dir,
            format,
            max_pages,
            no_save,
        } => {
            info!("Running job from {}", config.display());
            commands::run(config, output_dir, format, max_pages, no_save).await
        }
        Commands::Validate { config } => {
            info!("Validating {}", config.display());
            commands::validate(config)
        }
        Commands::Sample { path } => {
            info!("Writing sample job to {}", path.display());
            commands::sample(path)
        }
    }
}
