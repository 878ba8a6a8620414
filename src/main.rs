//! Quest Progress CLI
//!
//! Operator tool over the completion engine's database.
//!
//! ## Usage
//!
//! ```bash
//! # Create the database and default config
//! quest-progress init
//!
//! # Seed the task catalog from a JSON array of tasks
//! quest-progress import-tasks tasks.json
//!
//! # Start a quest and complete a task
//! quest-progress start-quest --user u1 --quest q1
//! quest-progress complete --user u1 --quest q1 --task t1 --enrollment <id> --evidence-text "done"
//!
//! # Recover a request that failed after the completion was recorded
//! quest-progress reconcile --user u1 --quest q1 --enrollment <id>
//!
//! # Inspect progress
//! quest-progress progress --user u1 --quest q1
//! quest-progress xp --user u1
//! ```
//!
//! Every command prints its result as JSON on stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use quest_progress::db::{enrollments, skill_xp, tasks, CreateTaskInput};
use quest_progress::services::events::spawn_logging_listener;
use quest_progress::{CompleteTaskRequest, Config, ProgressDb, Services};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "quest-progress")]
#[command(about = "Exactly-once task completion and XP engine")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "QUEST_PROGRESS_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "QUEST_PROGRESS_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Maximum pooled database connections
    #[arg(long)]
    pool_size: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the database schema and default config
    Init,

    /// Import tasks from a JSON array into the catalog
    ImportTasks {
        /// JSON file with task definitions
        file: PathBuf,
    },

    /// Start a quest for a user, or return their existing enrollment
    StartQuest {
        #[arg(long)]
        user: String,
        #[arg(long)]
        quest: String,
    },

    /// Complete a task
    Complete {
        #[arg(long)]
        user: String,
        #[arg(long)]
        quest: String,
        #[arg(long)]
        task: String,
        #[arg(long)]
        enrollment: String,
        #[arg(long)]
        evidence_text: Option<String>,
        #[arg(long)]
        evidence_url: Option<String>,
    },

    /// Re-run quest completion and bonus for an enrollment
    Reconcile {
        #[arg(long)]
        user: String,
        #[arg(long)]
        quest: String,
        #[arg(long)]
        enrollment: String,
    },

    /// Show a user's progress through a quest
    Progress {
        #[arg(long)]
        user: String,
        #[arg(long)]
        quest: String,
    },

    /// Show a user's XP per pillar
    Xp {
        #[arg(long)]
        user: String,
    },
}

#[derive(Serialize)]
struct XpReport {
    user_id: String,
    total: i64,
    pillars: Vec<quest_progress::db::SkillXp>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing (stderr, so JSON output stays clean)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("quest_progress=info".parse()?),
        )
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)
            .with_context(|| format!("loading config {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(pool_size) = args.pool_size {
        config.pool_size = pool_size;
    }

    info!(
        storage_dir = %config.storage_dir.display(),
        pool_size = config.pool_size,
        "Starting quest-progress"
    );

    let db = Arc::new(ProgressDb::open(&config).context("opening progress database")?);
    let services = Services::with_event_capacity(db.clone(), config.event_capacity);
    let listener = spawn_logging_listener(services.events.clone());

    // Diesel is blocking; keep it off the async workers
    let output = tokio::task::spawn_blocking(move || run(args.command, &config, &db, &services))
        .await
        .context("command task panicked")?;

    // Let the listener drain what the command emitted
    tokio::task::yield_now().await;
    listener.abort();

    match output {
        Ok(json) => {
            println!("{}", json);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            Err(e)
        }
    }
}

fn run(
    command: Command,
    config: &Config,
    db: &ProgressDb,
    services: &Services,
) -> anyhow::Result<String> {
    let json = match command {
        Command::Init => {
            let config_path = config.config_path();
            if !config_path.exists() {
                config.save(&config_path)?;
                info!(path = %config_path.display(), "Created default config");
            }
            serde_json::to_string_pretty(&db.stats()?)?
        }
        Command::ImportTasks { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let inputs: Vec<CreateTaskInput> = serde_json::from_str(&raw)?;
            let result = db.with_conn(|conn| tasks::bulk_create_tasks(conn, inputs))?;
            serde_json::to_string_pretty(&result)?
        }
        Command::StartQuest { user, quest } => {
            let enrollment =
                db.with_conn(|conn| enrollments::start_enrollment(conn, &user, &quest))?;
            serde_json::to_string_pretty(&enrollment)?
        }
        Command::Complete {
            user,
            quest,
            task,
            enrollment,
            evidence_text,
            evidence_url,
        } => {
            let result = services.completion.complete_task(&CompleteTaskRequest {
                user_id: user,
                quest_id: quest,
                task_id: task,
                enrollment_id: enrollment,
                evidence_text,
                evidence_url,
            })?;
            serde_json::to_string_pretty(&result)?
        }
        Command::Reconcile { user, quest, enrollment } => {
            let result = services.completion.reconcile_quest(&user, &quest, &enrollment)?;
            serde_json::to_string_pretty(&result)?
        }
        Command::Progress { user, quest } => {
            let progress = services.completion.quest_progress(&user, &quest)?;
            serde_json::to_string_pretty(&progress)?
        }
        Command::Xp { user } => {
            let pillars = db.with_conn(|conn| skill_xp::xp_profile(conn, &user))?;
            let report = XpReport {
                total: pillars.iter().map(|p| p.xp_amount).sum(),
                user_id: user,
                pillars,
            };
            serde_json::to_string_pretty(&report)?
        }
    };

    Ok(json)
}
