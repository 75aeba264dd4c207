//! jobq CLI: operator interface to a job store file.

use clap::{Parser, Subcommand};
use jobq::config::Config;
use jobq::engine::JobDb;
use jobq::model::{JobId, NewJob};
use jobq::telemetry::{TelemetryConfig, init_telemetry};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "jobq", about = "Durable job queue over a SQLite store")]
struct Cli {
    /// Store file (overrides JOBQ_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// TOML config file (instead of environment variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add a job
    Add {
        item_id: String,
        job_type: String,
        /// Version marker used for dedup
        #[arg(long)]
        init_data: Option<i64>,
    },
    /// Count rows in the store
    Count,
    /// List jobs
    List {
        /// Filter by job type
        #[arg(long)]
        job_type: Option<String>,
        /// Maximum jobs to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one job
    Show { id: i64 },
    /// Delete a job
    Remove { id: i64 },
    /// Take a job out of the queues, keeping its checkpoint
    Park { id: i64 },
    /// Run the recovery sweep and print queue lengths
    Recover,
    /// List tables in the store
    Tables,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mut cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_toml_file(path)?,
        None => Config::from_env_with_db_path(cli.db.clone())?,
    };
    if let Some(db) = cli.db.take() {
        config.db_path = db;
    }

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "jobq".to_string(),
        log_level: config.log_level.clone(),
    })?;

    // The store may belong to a running process: only `recover` resets
    // queue bookkeeping, and only `add` may create the file.
    let db = match cli.command {
        Command::Recover => JobDb::open_existing(&config.db_path, config.queue_config())?,
        Command::Add { .. } => JobDb::open_without_recovery(&config.db_path, config.queue_config())?,
        _ => JobDb::open_existing_without_recovery(&config.db_path, config.queue_config())?,
    };

    let result = match cli.command {
        Command::Add {
            item_id,
            job_type,
            init_data,
        } => cmd_add(&db, item_id, job_type, init_data),
        Command::Count => {
            let count = db
                .get_job_count()
                .ok_or_else(|| anyhow::anyhow!("counting jobs failed"))?;
            println!("{count}");
            Ok(())
        }
        Command::List { job_type, limit } => cmd_list(&db, job_type.as_deref(), limit),
        Command::Show { id } => cmd_show(&db, JobId(id)),
        Command::Remove { id } => {
            if db.remove_job(JobId(id)) {
                println!("Removed: {id}");
            } else {
                println!("No job {id}");
            }
            Ok(())
        }
        Command::Park { id } => {
            if db.failed_job(JobId(id), None, None) {
                println!("Parked: {id}");
            } else {
                println!("No job {id}");
            }
            Ok(())
        }
        Command::Recover => cmd_recover(&db),
        Command::Tables => {
            let tables = db
                .get_tables()
                .ok_or_else(|| anyhow::anyhow!("listing tables failed"))?;
            for table in tables {
                println!("{table}");
            }
            Ok(())
        }
    };

    db.close()?;
    result
}

fn cmd_add(db: &JobDb, item_id: String, job_type: String, init_data: Option<i64>) -> anyhow::Result<()> {
    let new = NewJob::from((item_id, job_type, init_data));
    match db.add_job(new.clone()) {
        Some(id) => {
            // Nothing in this process will run the job: leave the row out of
            // every queue so whichever process owns the store picks it up.
            db.failed_job(id, None, None);
            println!("Added: {id} ({} / {})", new.item_id, new.job_type)
        }
        None => println!("Not added: {} / {} is already covered", new.item_id, new.job_type),
    }
    Ok(())
}

fn cmd_list(db: &JobDb, job_type: Option<&str>, limit: usize) -> anyhow::Result<()> {
    let jobs = db.list_jobs(job_type, limit);
    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<12}  {:<24}  {:<8}  {:<20}  END",
        "ID", "TYPE", "ITEM", "INIT", "START"
    );
    println!("{}", "-".repeat(96));

    for job in &jobs {
        let init = job.init_data.map_or_else(|| "-".to_string(), |v| v.to_string());
        let start = job.start_value.as_deref().unwrap_or("-");
        let end = match &job.end_value {
            Some(jobq::model::EndValue::Bound(v)) => v.as_str(),
            Some(jobq::model::EndValue::Unbounded) => "(unbounded)",
            None => "-",
        };
        println!(
            "{:<8}  {:<12}  {:<24}  {:<8}  {:<20}  {}",
            job.id,
            truncate(&job.job_type, 12),
            truncate(&job.item_id, 24),
            init,
            truncate(start, 20),
            end
        );
    }

    println!("\n{} job(s)", jobs.len());
    Ok(())
}

fn cmd_show(db: &JobDb, id: JobId) -> anyhow::Result<()> {
    let job = db
        .get_job(id)
        .ok_or_else(|| jobq::Error::NotFound(id.to_string()))?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

fn cmd_recover(db: &JobDb) -> anyhow::Result<()> {
    // Opening the store already ran the sweep.
    let stats = db.stats();
    if stats.queue_lengths.is_empty() {
        println!("No queued jobs.");
    }
    for (job_type, len) in &stats.queue_lengths {
        println!("{job_type:<12}  {len}");
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
