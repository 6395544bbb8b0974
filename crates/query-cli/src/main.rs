use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use query_worker::TableSpec;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::*;
use config::{Config, OutputFormat};

#[derive(Parser)]
#[command(name = "qe")]
#[command(author, version, about = "Query Engine - Distributed SQL over Arrow Flight", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Coordinator to talk to (HOST:PORT)
    #[arg(short, long, global = true)]
    scheduler: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the coordinator
    Coordinator {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Start a worker and join the coordinator
    Worker {
        /// Worker id (generated when absent)
        #[arg(short, long)]
        worker_id: Option<String>,

        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Host the coordinator should dial back
        #[arg(short, long)]
        advertise_host: Option<String>,

        /// Tables to preload (format: name=path)
        #[arg(short, long)]
        table: Vec<TableSpec>,
    },

    /// Submit a SQL job to the coordinator
    Submit {
        /// SQL query to execute
        sql: String,

        /// Wait for the job and print its result
        #[arg(short, long)]
        wait: bool,

        /// Output format
        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,
    },

    /// Show one job
    Job {
        /// Job id
        id: String,
    },

    /// List all jobs
    Jobs,

    /// Print the result of a completed job
    #[command(name = "result")]
    JobResult {
        /// Job id
        id: String,

        /// Output format
        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,
    },

    /// Cancel a pending or running job
    Cancel {
        /// Job id
        id: String,
    },

    /// Show workers and job counters
    Cluster,

    /// Run SQL directly on a worker
    Query {
        /// Worker endpoint (HOST:PORT)
        #[arg(short, long)]
        worker: String,

        /// SQL query to execute
        #[arg(long)]
        sql: String,

        /// Output format
        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,
    },

    /// Check that a coordinator or worker answers
    Ping {
        /// Endpoint (HOST:PORT); defaults to the coordinator
        target: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose)?;

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };
    if let Some(scheduler) = cli.scheduler {
        config.worker.scheduler = scheduler;
    }
    let scheduler = config.worker.scheduler.clone();
    let max_rows = config.output.max_rows;
    let default_format = config.output.format;
    let format = |output: Option<OutputFormat>| output.unwrap_or(default_format);

    match cli.command {
        Commands::Coordinator { host, port } => {
            if let Some(host) = host {
                config.coordinator.host = host;
            }
            if let Some(port) = port {
                config.coordinator.port = port;
            }
            print_banner("Coordinator");
            start_coordinator(&config).await?;
        }
        Commands::Worker {
            worker_id,
            host,
            port,
            advertise_host,
            table,
        } => {
            let mut worker = config.worker.clone();
            if worker_id.is_some() {
                worker.worker_id = worker_id;
            }
            if let Some(host) = host {
                worker.bind_host = host;
            }
            if let Some(port) = port {
                worker.port = port;
            }
            if advertise_host.is_some() {
                worker.advertise_host = advertise_host;
            }
            worker.tables.extend(table);
            print_banner("Worker");
            start_worker(worker).await?;
        }
        Commands::Submit { sql, wait, output } => {
            submit(&scheduler, &sql, wait, format(output), max_rows).await?;
        }
        Commands::Job { id } => {
            show_job(&scheduler, &id).await?;
        }
        Commands::Jobs => {
            list_jobs(&scheduler).await?;
        }
        Commands::JobResult { id, output } => {
            show_result(&scheduler, &id, format(output), max_rows).await?;
        }
        Commands::Cancel { id } => {
            cancel_job(&scheduler, &id).await?;
        }
        Commands::Cluster => {
            cluster_status(&scheduler).await?;
        }
        Commands::Query {
            worker,
            sql,
            output,
        } => {
            query_on_worker(&worker, &sql, format(output), max_rows).await?;
        }
        Commands::Ping { target } => {
            ping(target.as_deref().unwrap_or(&scheduler)).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        "qe=debug,query_distributed=debug,query_worker=debug,query_flight=debug"
    } else {
        "qe=info,query_distributed=info,query_worker=info,query_flight=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn print_banner(role: &str) {
    println!(
        "{}",
        r#"
   ___                          _____            _
  / _ \ _   _  ___ _ __ _   _  | ____|_ __   __ _(_)_ __   ___
 | | | | | | |/ _ \ '__| | | | |  _| | '_ \ / _` | | '_ \ / _ \
 | |_| | |_| |  __/ |  | |_| | | |___| | | | (_| | | | | |  __/
  \__\_\\__,_|\___|_|   \__, | |_____|_| |_|\__, |_|_| |_|\___|
                        |___/               |___/
    "#
        .bright_cyan()
    );
    println!(
        "{}",
        format!("Distributed SQL {} v{}", role, env!("CARGO_PKG_VERSION")).bright_yellow()
    );
    println!("{}", "Press Ctrl+C to stop\n".bright_black());
}
