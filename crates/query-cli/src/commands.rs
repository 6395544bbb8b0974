use anyhow::{Context, Result};
use arrow::csv::Writer as CsvWriter;
use arrow::json::LineDelimitedWriter;
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use arrow_flight::Ticket;
use colored::{ColoredString, Colorize};
use comfy_table::{Cell, Color, Table as ComfyTable};
use query_distributed::{
    ClusterStatus, Coordinator, CoordinatorService, Job, JobStatus, WorkerInfo, WorkerStatus,
};
use query_flight::protocol::{actions, CANCELLED};
use query_flight::server::{bind, serve, shutdown_signal};
use query_flight::{FlightClient, FlightEndpoint, QueryOutput};
use query_worker::{Worker, WorkerConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{Config, OutputFormat};

/// How often `submit --wait` polls the coordinator
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

async fn connect(target: &str) -> Result<FlightClient> {
    let endpoint = FlightEndpoint::parse(target)?;
    FlightClient::connect(&endpoint.url())
        .await
        .with_context(|| format!("cannot reach {}", endpoint))
}

pub async fn start_coordinator(config: &Config) -> Result<()> {
    let coordinator = Arc::new(Coordinator::with_flight_transport(
        config.scheduler.clone(),
    ));
    let monitor = coordinator.spawn_health_monitor();

    let listener = bind(&config.coordinator.host, config.coordinator.port).await?;
    println!(
        "{} Coordinator listening on {}:{}",
        "✓".bright_green(),
        config.coordinator.host,
        config.coordinator.port
    );
    println!(
        "  Workers are live for {}ms after a heartbeat; jobs time out after {}ms",
        config.scheduler.staleness_window_ms, config.scheduler.execute_timeout_ms
    );

    let served = serve(
        CoordinatorService::new(coordinator),
        listener,
        shutdown_signal(),
    )
    .await;
    monitor.abort();
    served?;

    println!("{} Coordinator stopped", "✓".bright_green());
    Ok(())
}

pub async fn start_worker(config: WorkerConfig) -> Result<()> {
    let worker = Arc::new(Worker::new(config)?);
    println!(
        "{} Worker {} starting on port {}, coordinator {}",
        "→".bright_blue(),
        worker.id().bright_cyan(),
        worker.config().port,
        worker.scheduler()
    );
    for table in &worker.config().tables {
        println!("  Preloading {}", table.to_string().bright_cyan());
    }

    worker.run(shutdown_signal()).await?;

    println!("{} Worker stopped", "✓".bright_green());
    Ok(())
}

pub async fn submit(
    target: &str,
    sql: &str,
    wait: bool,
    format: OutputFormat,
    max_rows: usize,
) -> Result<()> {
    let mut client = connect(target).await?;
    let id = client.submit(sql).await?;

    if !wait {
        println!("{}", id);
        return Ok(());
    }

    println!("{} Submitted job {}", "→".bright_blue(), id.bright_cyan());
    let start = Instant::now();
    let job = loop {
        let job: Job = client.action_json(actions::JOB, id.as_str()).await?;
        if job.status.is_terminal() {
            break job;
        }
        tokio::time::sleep(WAIT_POLL_INTERVAL).await;
    };

    match job.status {
        JobStatus::Completed => {
            let output = client.fetch(Ticket::new(id)).await?;
            print_output(&output, format, max_rows)?;
            println!(
                "{} {} rows from worker {} in {:.2}ms",
                "✓".bright_green(),
                output.total_rows,
                job.worker_id.map(|w| w.to_string()).unwrap_or_default(),
                start.elapsed().as_secs_f64() * 1000.0
            );
            Ok(())
        }
        status => {
            anyhow::bail!(
                "job {} {}: {}",
                job.id,
                status,
                job.error.unwrap_or_default()
            )
        }
    }
}

pub async fn show_job(target: &str, id: &str) -> Result<()> {
    let mut client = connect(target).await?;
    let job: Job = client.action_json(actions::JOB, id).await?;

    let mut table = ComfyTable::new();
    table.set_header(vec![
        Cell::new("Field").fg(Color::Cyan),
        Cell::new("Value").fg(Color::Yellow),
    ]);
    let optional = |v: Option<u64>| v.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string());

    table.add_row(vec!["id".to_string(), job.id.to_string()]);
    table.add_row(vec!["status".to_string(), job.status.to_string()]);
    table.add_row(vec!["sql".to_string(), job.sql.clone()]);
    table.add_row(vec![
        "worker".to_string(),
        job.worker_id
            .as_ref()
            .map(|w| w.to_string())
            .unwrap_or_else(|| "-".to_string()),
    ]);
    table.add_row(vec!["created_at".to_string(), job.created_at.to_string()]);
    table.add_row(vec!["started_at".to_string(), optional(job.started_at)]);
    table.add_row(vec!["completed_at".to_string(), optional(job.completed_at)]);
    table.add_row(vec![
        "progress".to_string(),
        format!("{:.0}%", job.progress * 100.0),
    ]);
    table.add_row(vec!["rows".to_string(), job.rows_processed.to_string()]);
    table.add_row(vec!["bytes".to_string(), job.bytes_processed.to_string()]);
    if let Some(error) = &job.error {
        table.add_row(vec!["error".to_string(), error.clone()]);
    }

    println!("{}", table);
    Ok(())
}

pub async fn list_jobs(target: &str) -> Result<()> {
    let mut client = connect(target).await?;
    let jobs: Vec<Job> = client.action_json(actions::JOBS, "").await?;

    if jobs.is_empty() {
        println!("{}", "No jobs submitted".bright_yellow());
        return Ok(());
    }

    let mut table = ComfyTable::new();
    table.set_header(vec![
        Cell::new("Job").fg(Color::Cyan),
        Cell::new("Status").fg(Color::Yellow),
        Cell::new("Worker").fg(Color::Green),
        Cell::new("Rows").fg(Color::Magenta),
        Cell::new("Elapsed").fg(Color::Blue),
        Cell::new("SQL"),
    ]);

    for job in &jobs {
        let elapsed = match (job.started_at, job.completed_at) {
            (Some(start), Some(end)) => format!("{}ms", end.saturating_sub(start)),
            _ => "-".to_string(),
        };
        table.add_row(vec![
            job.id.to_string(),
            job_status(job.status).to_string(),
            job.worker_id
                .as_ref()
                .map(|w| w.to_string())
                .unwrap_or_else(|| "-".to_string()),
            job.rows_processed.to_string(),
            elapsed,
            truncate(&job.sql, 60),
        ]);
    }

    println!("{}", table);
    Ok(())
}

pub async fn show_result(target: &str, id: &str, format: OutputFormat, max_rows: usize) -> Result<()> {
    let mut client = connect(target).await?;
    let output = client.fetch(Ticket::new(id.to_string())).await?;
    print_output(&output, format, max_rows)
}

pub async fn cancel_job(target: &str, id: &str) -> Result<()> {
    let mut client = connect(target).await?;
    let reply = client.action(actions::CANCEL, id).await?;

    if reply == CANCELLED {
        println!("{} Job {} cancelled", "✓".bright_green(), id.bright_cyan());
    } else {
        println!(
            "{} Job {} is unknown or already finished",
            "✗".bright_red(),
            id.bright_cyan()
        );
    }
    Ok(())
}

pub async fn cluster_status(target: &str) -> Result<()> {
    let mut client = connect(target).await?;
    let status: ClusterStatus = client.action_json(actions::CLUSTER_STATUS, "").await?;

    println!("{}", "Cluster Status:".bright_yellow().bold());
    println!("{}", "─".repeat(50));
    println!(
        "  Workers:        {} online / {} total",
        status.online_workers, status.total_workers
    );
    println!("  Active jobs:    {}", status.active_jobs);
    println!("  Completed jobs: {}", status.completed_jobs);
    println!("  Failed jobs:    {}", status.failed_jobs);
    println!("  Bytes:          {}", status.total_bytes_processed);
    println!("  Uptime:         {}s", status.uptime_secs);
    println!("{}", "─".repeat(50));

    if !status.workers.is_empty() {
        println!("{}", workers_table(&status.workers));
    }
    Ok(())
}

/// Run SQL directly on one worker, bypassing the coordinator
pub async fn query_on_worker(
    worker: &str,
    sql: &str,
    format: OutputFormat,
    max_rows: usize,
) -> Result<()> {
    let start = Instant::now();
    let mut client = connect(worker).await?;
    let output = client.execute_sql(sql).await?;

    print_output(&output, format, max_rows)?;
    println!(
        "{} {} rows in {:.2}ms",
        "✓".bright_green(),
        output.total_rows,
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}

pub async fn ping(target: &str) -> Result<()> {
    let start = Instant::now();
    let mut client = connect(target).await?;
    client.ping().await?;
    println!(
        "{} {} answered in {:.2}ms",
        "✓".bright_green(),
        client.endpoint(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}

fn workers_table(workers: &[WorkerInfo]) -> ComfyTable {
    let mut table = ComfyTable::new();
    table.set_header(vec![
        Cell::new("Worker").fg(Color::Cyan),
        Cell::new("Address").fg(Color::Yellow),
        Cell::new("Status").fg(Color::Green),
        Cell::new("CPU %").fg(Color::Magenta),
        Cell::new("Memory MB"),
        Cell::new("Memory %"),
        Cell::new("Jobs"),
        Cell::new("Bytes"),
    ]);

    for worker in workers {
        let status = match worker.status {
            WorkerStatus::Idle => worker.status.to_string().bright_green(),
            WorkerStatus::Busy => worker.status.to_string().bright_yellow(),
            WorkerStatus::Offline => worker.status.to_string().bright_red(),
        };
        table.add_row(vec![
            worker.id.to_string(),
            worker.endpoint().to_string(),
            status.to_string(),
            format!("{:.2}", worker.cpu_percent),
            format!("{:.2}", worker.memory_mb),
            format!("{:.2}", worker.memory_percent),
            worker.jobs_completed.to_string(),
            worker.bytes_processed.to_string(),
        ]);
    }
    table
}

fn job_status(status: JobStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        JobStatus::Pending => text.bright_black(),
        JobStatus::Running => text.bright_blue(),
        JobStatus::Completed => text.bright_green(),
        JobStatus::Failed => text.bright_red(),
        JobStatus::Cancelled => text.bright_yellow(),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= max_chars {
        single_line
    } else {
        let head: String = single_line.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}

/// Keep at most `max_rows` rows across the batches
fn limit_rows(batches: &[RecordBatch], max_rows: usize) -> Vec<RecordBatch> {
    let mut remaining = max_rows;
    let mut limited = Vec::new();
    for batch in batches {
        if remaining == 0 {
            break;
        }
        let take = batch.num_rows().min(remaining);
        limited.push(batch.slice(0, take));
        remaining -= take;
    }
    limited
}

fn print_output(output: &QueryOutput, format: OutputFormat, max_rows: usize) -> Result<()> {
    let batches = limit_rows(&output.batches, max_rows);

    match format {
        OutputFormat::Table => {
            if batches.is_empty() {
                let names: Vec<&str> = output
                    .schema
                    .fields()
                    .iter()
                    .map(|f| f.name().as_str())
                    .collect();
                println!("{} ({})", "Empty result".bright_yellow(), names.join(", "));
            } else {
                println!("{}", pretty_format_batches(&batches)?);
            }
        }
        OutputFormat::Csv => {
            let mut writer = CsvWriter::new(std::io::stdout());
            for batch in &batches {
                writer.write(batch)?;
            }
        }
        OutputFormat::Json => {
            let mut writer = LineDelimitedWriter::new(std::io::stdout());
            for batch in &batches {
                writer.write(batch)?;
            }
            writer.finish()?;
        }
    }

    if output.total_rows > max_rows {
        println!(
            "{}",
            format!("({} of {} rows shown)", max_rows, output.total_rows).bright_black()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field, Schema};

    #[test]
    fn test_limit_rows_across_batches() {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, false)]));
        let batch = |values: Vec<i32>| {
            RecordBatch::try_new(schema.clone(), vec![Arc::new(Int32Array::from(values))]).unwrap()
        };
        let batches = vec![batch(vec![1, 2, 3]), batch(vec![4, 5, 6])];

        let limited = limit_rows(&batches, 4);
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[1].num_rows(), 1);
        assert!(limit_rows(&batches, 0).is_empty());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("SELECT 1", 60), "SELECT 1");
        assert_eq!(truncate("SELECT\n  a,\n  b", 60), "SELECT a, b");
        assert_eq!(truncate("abcdef", 4), "abc…");
    }
}
