//! gradebook CLI: the user-facing command-line interface.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "gradebook",
    version,
    about = "Grade evaluation and report card generation"
)]
struct Cli {
    /// Config file path (default: ./gradebook.toml, then ~/.config/gradebook/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a starter config, templates and a sample school
    Init {
        /// Overwrite existing templates
        #[arg(long)]
        force: bool,
    },

    /// Validate a school dataset TOML file
    Validate {
        /// Path to the school dataset
        #[arg(long)]
        school: PathBuf,
    },

    /// Import a school dataset into the data file
    Import {
        /// Path to the school dataset
        #[arg(long)]
        school: PathBuf,
    },

    /// Record a batch of grades
    Grades {
        /// Path to the grade batch TOML file
        #[arg(long)]
        batch: PathBuf,

        /// Recompute the status of every affected student afterwards
        #[arg(long)]
        evaluate: bool,
    },

    /// Compute pass/fail status for a student or a whole level
    Status {
        #[arg(long)]
        level: String,

        #[arg(long)]
        year: String,

        /// Only this student (default: every enrolled student)
        #[arg(long)]
        student: Option<u64>,

        /// Only create missing PENDING statuses, without evaluating
        #[arg(long)]
        init: bool,
    },

    /// Record a status decided by staff
    ValidateStatus {
        #[arg(long)]
        student: u64,

        #[arg(long)]
        level: String,

        #[arg(long)]
        year: String,

        /// PASS, CONDITIONAL, FAIL, INCOMPLETE or PENDING
        #[arg(long)]
        status: String,

        /// Name of the person validating
        #[arg(long)]
        by: String,
    },

    /// Promote a student whose stored status allows it
    Promote {
        #[arg(long)]
        student: u64,

        #[arg(long)]
        level: String,

        #[arg(long)]
        year: String,
    },

    /// Generate a report card for a student or a whole level
    Report {
        #[arg(long)]
        level: String,

        #[arg(long)]
        year: String,

        /// Only this student (default: the whole level)
        #[arg(long)]
        student: Option<u64>,

        /// Report kind: yearly, periodic
        #[arg(long, default_value = "yearly")]
        kind: String,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete cached reports older than the retention window
    Sweep {
        /// Retention in days (default: from config)
        #[arg(long)]
        retention_days: Option<u32>,

        /// Keep sweeping until interrupted
        #[arg(long)]
        watch: bool,

        /// Seconds between sweeps in watch mode
        #[arg(long, default_value_t = 3600, value_parser = clap::value_parser!(u64).range(1..))]
        every_secs: u64,
    },

    /// List stored records: students, levels, years, statuses, reports
    List {
        /// What to list
        #[arg(default_value = "students")]
        what: String,

        /// Level filter for statuses
        #[arg(long)]
        level: Option<String>,

        /// Academic year filter for statuses
        #[arg(long)]
        year: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gradebook=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config;

    let result = match cli.command {
        Commands::Init { force } => commands::init::execute(force),
        Commands::Validate { school } => commands::validate::execute(school),
        Commands::Import { school } => commands::import::execute(school, config),
        Commands::Grades { batch, evaluate } => {
            commands::grades::execute(batch, evaluate, config).await
        }
        Commands::Status {
            level,
            year,
            student,
            init,
        } => commands::status::execute(level, year, student, init, config).await,
        Commands::ValidateStatus {
            student,
            level,
            year,
            status,
            by,
        } => commands::status::validate(student, level, year, status, by, config).await,
        Commands::Promote {
            student,
            level,
            year,
        } => commands::status::promote(student, level, year, config).await,
        Commands::Report {
            level,
            year,
            student,
            kind,
            json,
        } => commands::report::execute(level, year, student, kind, json, config).await,
        Commands::Sweep {
            retention_days,
            watch,
            every_secs,
        } => {
            let every = watch.then(|| Duration::from_secs(every_secs));
            commands::report::sweep(retention_days, every, config).await
        }
        Commands::List { what, level, year } => {
            commands::list::execute(what, level, year, config).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
