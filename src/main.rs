use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use dutysync::config::RetentionConfig;
use dutysync::scheduler::{Job, JobStore};
use dutysync::sheet::{cell_text, JsonSheetCodec, SheetCodec};
use dutysync::shutdown::install_shutdown_handler;
use dutysync::sweeper::{RetentionSweeper, SweepReport};

#[derive(Parser, Debug)]
#[command(name = "dutysync")]
#[command(version)]
#[command(about = "Batched duty-status synchronisation jobs")]
#[command(propagate_version = true)]
struct Args {
    /// Directory holding one subdirectory per job
    #[arg(long, global = true, env = "DUTYSYNC_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "table")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Delete job data older than the retention window
    Sweep {
        /// Retention window in hours
        #[arg(long, env = "DUTYSYNC_RETENTION_HOURS", default_value = "6")]
        retention_hours: u64,

        /// Keep sweeping until interrupted
        #[arg(long)]
        watch: bool,

        /// Seconds between sweeps with --watch
        #[arg(long, default_value = "600")]
        interval_secs: u64,
    },

    /// Show one job's status
    Status {
        /// Job ID
        job_id: Uuid,
    },

    /// List all jobs in the data directory
    List,

    /// Check that a sheet can be used as job input
    Inspect {
        /// Path to the sheet
        sheet: PathBuf,

        /// Identifier column
        #[arg(long)]
        column: String,
    },
}

// =============================================================================
// Output Types
// =============================================================================

#[derive(Serialize)]
struct JobStatusOutput {
    job_id: String,
    status: String,
    vessel: String,
    error: Option<String>,
    outputs_ready: bool,
    download_token: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<&Job> for JobStatusOutput {
    fn from(job: &Job) -> Self {
        let view = job.status_view();
        Self {
            job_id: job.id.to_string(),
            status: job.status.to_string(),
            vessel: job.spec.vessel.clone(),
            error: view.error,
            outputs_ready: view.outputs_ready,
            download_token: view.download_token,
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
struct SweepOutput {
    removed: Vec<String>,
    skipped_active: Vec<String>,
    errors: Vec<String>,
}

impl From<&SweepReport> for SweepOutput {
    fn from(report: &SweepReport) -> Self {
        Self {
            removed: report
                .removed
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
            skipped_active: report.skipped_active.iter().map(Uuid::to_string).collect(),
            errors: report
                .errors
                .iter()
                .map(|(p, e)| format!("{}: {}", p.display(), e))
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct InspectOutput {
    path: String,
    header: Vec<String>,
    rows: usize,
    blank_identifiers: usize,
    valid: bool,
    problem: Option<String>,
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn handle_sweep(
    data_dir: PathBuf,
    retention_hours: u64,
    watch: bool,
    interval_secs: u64,
    output_format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = RetentionConfig {
        retention: Duration::from_secs(retention_hours * 60 * 60),
        interval: Duration::from_secs(interval_secs.max(1)),
    };
    // No records in memory: every pass reads job state from disk.
    let store = Arc::new(JobStore::in_memory());
    let sweeper = RetentionSweeper::new(store, &data_dir, &config);

    if watch {
        let shutdown = CancellationToken::new();
        install_shutdown_handler(shutdown.clone())?;
        sweeper.run(shutdown).await;
        return Ok(());
    }

    let report = sweeper.sweep().await;
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&SweepOutput::from(&report))?);
        }
        OutputFormat::Table => {
            println!("Removed:        {}", report.removed.len());
            for path in &report.removed {
                println!("  {}", path.display());
            }
            println!("Skipped active: {}", report.skipped_active.len());
            for id in &report.skipped_active {
                println!("  {}", id);
            }
            if !report.errors.is_empty() {
                println!("Errors:");
                for (path, e) in &report.errors {
                    println!("  {}: {}", path.display(), e);
                }
            }
        }
    }

    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}

async fn handle_status(
    data_dir: PathBuf,
    job_id: Uuid,
    output_format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let job = match JobStore::load_record(&data_dir, job_id).await {
        Ok(job) => job,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let output = JobStatusOutput::from(&job);

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Job ID:         {}", output.job_id);
            println!("Status:         {}", output.status);
            println!("Vessel:         {}", output.vessel);
            println!("Created:        {}", output.created_at);
            println!("Updated:        {}", output.updated_at);
            println!(
                "Outputs:        {}",
                if output.outputs_ready { "ready" } else { "-" }
            );
            if let Some(token) = &output.download_token {
                println!("Download Token: {}", token);
            }
            if let Some(error) = &output.error {
                println!("Error:");
                for line in error.lines() {
                    println!("  {}", line);
                }
            }
        }
    }
    Ok(())
}

async fn handle_list(
    data_dir: PathBuf,
    output_format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = JobStore::snapshot(&data_dir).await?;
    let jobs = store.list().await;

    match output_format {
        OutputFormat::Json => {
            let output: Vec<JobStatusOutput> = jobs.iter().map(JobStatusOutput::from).collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("No jobs found.");
                return Ok(());
            }
            println!("{:<38} {:<10} {:<26} VESSEL", "JOB ID", "STATUS", "CREATED");
            println!("{}", "-".repeat(90));
            for job in &jobs {
                println!(
                    "{:<38} {:<10} {:<26} {}",
                    job.id,
                    job.status,
                    job.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    job.spec.vessel
                );
            }
            println!();
            println!("{} jobs", jobs.len());
        }
    }
    Ok(())
}

async fn handle_inspect(
    sheet_path: PathBuf,
    column: String,
    output_format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let sheet = JsonSheetCodec.read(&sheet_path).await?;
    let problem = sheet.validate(&column).err().map(|e| e.to_string());
    let blank_identifiers = sheet
        .records()
        .iter()
        .filter(|row| row.get(column.trim()).map(cell_text).unwrap_or_default().is_empty())
        .count();

    let output = InspectOutput {
        path: sheet_path.display().to_string(),
        header: sheet.header.clone(),
        rows: sheet.rows.len(),
        blank_identifiers,
        valid: problem.is_none(),
        problem,
    };

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Sheet:             {}", output.path);
            println!("Columns:           {}", output.header.join(", "));
            println!("Rows:              {}", output.rows);
            println!("Blank identifiers: {}", output.blank_identifiers);
            match &output.problem {
                None => println!("Usable as input:   yes"),
                Some(problem) => println!("Usable as input:   no ({})", problem),
            }
        }
    }

    if !output.valid {
        std::process::exit(1);
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Sweep {
            retention_hours,
            watch,
            interval_secs,
        } => {
            handle_sweep(args.data_dir, retention_hours, watch, interval_secs, args.output).await?;
        }
        Commands::Status { job_id } => {
            handle_status(args.data_dir, job_id, args.output).await?;
        }
        Commands::List => {
            handle_list(args.data_dir, args.output).await?;
        }
        Commands::Inspect { sheet, column } => {
            handle_inspect(sheet, column, args.output).await?;
        }
    }

    Ok(())
}
