//! buildpool CLI - submit builds and administer pools.

mod error;
mod submit;

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use buildpool_client::{tail_log, BuildpoolClient};
use buildpool_core::{CapId, JobError};

use error::CliError;
use submit::SubmitArgs;

/// buildpool CLI - distributed container builds
#[derive(Parser)]
#[command(name = "buildpool", version)]
#[command(about = "Submit builds to a buildpool daemon and manage its pools", long_about = None)]
struct Cli {
    /// Capability file (submission.cap for builds, admin.cap for pools)
    #[arg(long, env = "BUILDPOOL_CAP")]
    cap: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a build and follow its log
    Submit(SubmitArgs),

    /// List pools
    Pools,

    /// Show a pool's status
    Show {
        pool: String,
    },

    /// List a pool's workers
    Workers {
        pool: String,
    },

    /// Stop assigning new jobs to a worker
    Pause {
        pool: String,
        worker: String,
    },

    /// Resume assigning jobs to a worker
    Unpause {
        pool: String,
        worker: String,
    },

    /// Ask a worker to drain and update itself
    Update {
        pool: String,
        worker: String,
    },

    /// Print a job's log
    Log {
        /// Job id printed by `submit`
        job: String,

        /// Byte offset to start from
        #[arg(long, default_value = "0")]
        start: u64,
    },

    /// Cancel a job
    Cancel {
        /// Job id printed by `submit`
        job: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        let candidates = e.candidates();
        if !candidates.is_empty() {
            eprintln!("candidates:");
            for name in candidates {
                eprintln!("  {name}");
            }
        }
        std::process::exit(e.exit_code());
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let client = BuildpoolClient::from_cap_file(&cli.cap)?;

    match cli.command {
        Commands::Submit(args) => submit(&client, &args).await,
        Commands::Pools => {
            for pool in client.pools().await? {
                println!("{pool}");
            }
            Ok(())
        }
        Commands::Show { pool } => {
            print!("{}", client.dump(&pool).await?);
            Ok(())
        }
        Commands::Workers { pool } => list_workers(&client, &pool).await,
        Commands::Pause { pool, worker } => {
            client.set_active(&pool, &worker, false).await?;
            println!("Paused {worker} in {pool}");
            Ok(())
        }
        Commands::Unpause { pool, worker } => {
            client.set_active(&pool, &worker, true).await?;
            println!("Unpaused {worker} in {pool}");
            Ok(())
        }
        Commands::Update { pool, worker } => {
            if !client.self_update(&pool, &worker).await? {
                return Err(CliError::UpdateRefused(worker));
            }
            println!("Update scheduled for {worker}; it will restart once drained");
            Ok(())
        }
        Commands::Log { job, start } => {
            follow(&client, &CapId::new(job), start).await?;
            Ok(())
        }
        Commands::Cancel { job } => {
            let status = client.cancel(&CapId::new(job.clone())).await?;
            println!("{job}: {}", status.status.as_str());
            Ok(())
        }
    }
}

async fn submit(client: &BuildpoolClient, args: &SubmitArgs) -> Result<(), CliError> {
    let request = args.to_request()?;
    request.validate()?;

    let job = client.submit_job(&request).await?;
    eprintln!("Job {job} submitted to {}", request.pool);
    if args.detach {
        println!("{job}");
        return Ok(());
    }

    follow(client, &job, 0).await?;
    let outcome = client.result(&job).await?;
    if let Err(e) = client.release(&job).await {
        tracing::debug!(job = %job, error = %e, "Job release failed");
    }

    match outcome {
        Ok(output) => {
            println!("{}", output.trim_end());
            Ok(())
        }
        Err(JobError::BuildFailed { exit_code, output }) => {
            eprintln!("{}", output.trim_end());
            Err(CliError::Job(JobError::BuildFailed {
                exit_code,
                output: String::new(),
            }))
        }
        Err(e) => Err(CliError::Job(e)),
    }
}

/// Copy a job's log to stdout until the job is done.
async fn follow(client: &BuildpoolClient, job: &CapId, start: u64) -> Result<u64, CliError> {
    let mut stdout = std::io::stdout();
    let end = tail_log(client, job, start, |chunk| {
        let _ = stdout.write_all(chunk);
        let _ = stdout.flush();
    })
    .await?;
    Ok(end)
}

async fn list_workers(client: &BuildpoolClient, pool: &str) -> Result<(), CliError> {
    let workers = client.workers(pool).await?;

    println!("Workers ({}):", workers.len());
    println!("{:<24}  {:<8}  {}", "NAME", "STATE", "JOBS");
    println!("{}", "-".repeat(44));
    for worker in workers {
        let state = if worker.active { "active" } else { "paused" };
        let jobs = format!("{}/{}", worker.running, worker.capacity);
        println!("{:<24}  {:<8}  {}", worker.name, state, jobs);
    }
    Ok(())
}
