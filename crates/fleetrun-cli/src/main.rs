//! FleetRun CLI - Command line interface for the FleetRun control plane.

use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use fleetrun_client::http::HttpClient;
use fleetrun_core::{JobId, JobSpec, TaskTemplate};
use fleetrun_proto::{JobStatusResponse, WorkerSummary};

/// FleetRun CLI - Control plane management tool
#[derive(Parser)]
#[command(name = "fleetrun")]
#[command(about = "CLI for the FleetRun control plane", long_about = None)]
struct Cli {
    /// Control plane base URL
    #[arg(short, long, env = "FLEETRUN_CONTROL_PLANE", default_value = "http://127.0.0.1:8080")]
    addr: String,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a new job
    #[command(name = "submit-job")]
    SubmitJob(SubmitArgs),

    /// Get job status
    #[command(name = "get-job")]
    GetJob {
        /// Job ID
        id: String,
    },

    /// Poll a job until it finishes
    #[command(name = "watch-job")]
    WatchJob {
        /// Job ID
        id: String,

        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },

    /// List all jobs
    #[command(name = "list-jobs")]
    ListJobs,

    /// Cancel a job
    #[command(name = "cancel-job")]
    CancelJob {
        /// Job ID to cancel
        id: String,
    },

    /// List registered workers
    #[command(name = "list-workers")]
    ListWorkers,

    /// Check control plane health
    Health,
}

#[derive(Args)]
struct SubmitArgs {
    /// Job name
    #[arg(short, long)]
    name: String,

    /// Executor kind each task runs (e.g. train, echo)
    #[arg(short, long, default_value = "train")]
    kind: String,

    /// Total number of work units
    #[arg(short, long)]
    units: u64,

    /// Units grouped into one task
    #[arg(long, default_value_t = 1)]
    units_per_task: u64,

    /// Dataset reference
    #[arg(short, long)]
    data_ref: String,

    /// Job parameter, repeatable (key=value)
    #[arg(short, long = "param", value_parser = parse_key_value)]
    params: Vec<(String, String)>,

    /// Executor parameters as a JSON object
    #[arg(long, value_parser = parse_json)]
    template_params: Option<serde_json::Value>,

    /// Capability tag a worker must have, repeatable
    #[arg(long = "require")]
    required: Vec<String>,

    /// Higher runs first
    #[arg(long, default_value_t = 0)]
    priority: i32,

    /// Attempts per task before it is failed
    #[arg(long)]
    max_retries: Option<u32>,

    /// Submitting identity
    #[arg(long, env = "USER", default_value = "anonymous")]
    user: String,
}

impl SubmitArgs {
    fn to_spec(&self) -> JobSpec {
        let mut template = TaskTemplate::new(self.kind.clone());
        if let Some(params) = &self.template_params {
            template.parameters = params.clone();
        }

        let mut spec = JobSpec::new(self.name.clone(), template, self.units, self.data_ref.clone())
            .with_units_per_task(self.units_per_task)
            .with_priority(self.priority);
        for (key, value) in &self.params {
            spec = spec.with_parameter(key.clone(), value.clone());
        }
        for tag in &self.required {
            spec = spec.with_capability(tag.clone());
        }
        if let Some(retries) = self.max_retries {
            spec = spec.with_max_retries(retries);
        }
        spec
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_json(s: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(s).map_err(|e| format!("invalid JSON: {e}"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = HttpClient::new(&cli.addr);

    match cli.command {
        Commands::SubmitJob(args) => {
            let response = client.submit_job(args.to_spec(), &args.user).await?;
            if cli.json {
                print_json(&response)?;
            } else {
                println!("Job submitted:");
                println!("  ID:         {}", response.job_id);
                println!("  Status:     {}", response.status);
                println!("  Tasks:      {}", response.total_tasks);
            }
        }
        Commands::GetJob { id } => {
            let job = client.get_job(&JobId::new(id)).await?;
            if cli.json {
                print_json(&job)?;
            } else {
                print_job(&job);
            }
        }
        Commands::WatchJob { id, interval_ms } => {
            watch_job(&client, JobId::new(id), Duration::from_millis(interval_ms)).await?;
        }
        Commands::ListJobs => {
            let response = client.list_jobs().await?;
            if cli.json {
                print_json(&response)?;
            } else {
                list_jobs(&response.jobs);
            }
        }
        Commands::CancelJob { id } => {
            let response = client.cancel_job(&JobId::new(id)).await?;
            if cli.json {
                print_json(&response)?;
            } else if response.accepted {
                println!("Cancellation accepted, job is {}", response.status);
            } else {
                println!("Job already finished as {}", response.status);
            }
        }
        Commands::ListWorkers => {
            let response = client.list_workers().await?;
            if cli.json {
                print_json(&response)?;
            } else {
                list_workers(&response.workers);
            }
        }
        Commands::Health => {
            let healthy = client.health().await?;
            println!("{}", if healthy { "healthy" } else { "unhealthy" });
            if !healthy {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn watch_job(
    client: &HttpClient,
    id: JobId,
    interval: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut last_progress = -1.0;
    loop {
        let job = client.get_job(&id).await?;
        if job.progress != last_progress {
            println!(
                "{}  {:<14}  {:>6.1}%  ({}/{} done, {} failed)",
                format_timestamp(&job.last_updated_at),
                job.status.to_string(),
                job.progress * 100.0,
                job.completed_tasks + job.failed_tasks + job.cancelled_tasks,
                job.total_tasks,
                job.failed_tasks
            );
            last_progress = job.progress;
        }
        if job.status.is_terminal() {
            print_job(&job);
            return Ok(());
        }
        tokio::time::sleep(interval).await;
    }
}

fn list_jobs(jobs: &[JobStatusResponse]) {
    println!("Jobs ({}):", jobs.len());
    println!(
        "{:<36}  {:<14}  {:>8}  {:<16}  {}",
        "ID", "STATUS", "PROGRESS", "NAME", "CREATED"
    );
    println!("{}", "-".repeat(96));

    for job in jobs {
        println!(
            "{:<36}  {:<14}  {:>7.1}%  {:<16}  {}",
            job.job_id,
            job.status.to_string(),
            job.progress * 100.0,
            job.name,
            format_timestamp(&job.created_at)
        );
    }
}

fn list_workers(workers: &[WorkerSummary]) {
    println!("Workers ({}):", workers.len());
    println!(
        "{:<36}  {:<12}  {:<6}  {:<9}  {:<20}  {}",
        "ID", "STATUS", "TASKS", "DONE/FAIL", "HOSTNAME", "TAGS"
    );
    println!("{}", "-".repeat(100));

    for worker in workers {
        let tasks = format!("{}/{}", worker.current_tasks.len(), worker.max_concurrent_tasks);
        let counts = format!("{}/{}", worker.completed_count, worker.failed_count);
        let tags: Vec<&str> = worker.tags.iter().map(String::as_str).collect();
        println!(
            "{:<36}  {:<12}  {:<6}  {:<9}  {:<20}  {}",
            worker.worker_id,
            worker.status.to_string(),
            tasks,
            counts,
            worker.hostname,
            tags.join(", ")
        );
    }
}

fn print_job(job: &JobStatusResponse) {
    println!("  ID:         {}", job.job_id);
    println!("  Name:       {}", job.name);
    println!("  Status:     {}", job.status);
    println!("  Progress:   {:.1}%", job.progress * 100.0);
    println!(
        "  Tasks:      {} completed, {} failed, {} cancelled, {} total",
        job.completed_tasks, job.failed_tasks, job.cancelled_tasks, job.total_tasks
    );
    println!("  Submitter:  {}", job.submitted_by);
    println!("  Created:    {}", format_timestamp(&job.created_at));
    if let Some(finished) = &job.finished_at {
        println!("  Finished:   {}", format_timestamp(finished));
    }

    if !job.aggregate_metrics.mean.is_empty() {
        println!("  Metrics ({} samples):", job.aggregate_metrics.samples);
        for (name, mean) in &job.aggregate_metrics.mean {
            let latest = job.aggregate_metrics.latest.get(name).copied().unwrap_or(*mean);
            println!("    - {name}: mean {mean:.4}, latest {latest:.4}");
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("lr=0.01").unwrap(),
            ("lr".to_string(), "0.01".to_string())
        );
        assert_eq!(
            parse_key_value("query=a=b").unwrap(),
            ("query".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("lr").is_err());
        assert!(parse_key_value("=1").is_err());
    }

    #[test]
    fn test_submit_args_build_spec() {
        let cli = Cli::try_parse_from([
            "fleetrun",
            "submit-job",
            "--name",
            "iris",
            "--units",
            "10",
            "--units-per-task",
            "3",
            "--data-ref",
            "datasets/iris.csv",
            "--param",
            "lr=0.01",
            "--require",
            "gpu",
            "--max-retries",
            "5",
            "--template-params",
            r#"{"fail": true}"#,
            "--user",
            "alice",
        ])
        .unwrap();

        let Commands::SubmitJob(args) = cli.command else {
            panic!("expected submit-job");
        };
        let spec = args.to_spec();
        assert_eq!(spec.task_template.kind, "train");
        assert_eq!(spec.task_template.parameters["fail"], serde_json::json!(true));
        assert_eq!(spec.unit_count, 10);
        assert_eq!(spec.task_count(), 4);
        assert_eq!(spec.parameters.get("lr").map(String::as_str), Some("0.01"));
        assert!(spec.required_capabilities.contains("gpu"));
        assert_eq!(spec.max_retries, Some(5));
        assert!(spec.validate().is_ok());
        assert_eq!(args.user, "alice");
    }

    #[test]
    fn test_rejects_bad_template_params() {
        let result = Cli::try_parse_from([
            "fleetrun",
            "submit-job",
            "--name",
            "iris",
            "--units",
            "1",
            "--data-ref",
            "iris",
            "--template-params",
            "{not json",
        ]);
        assert!(result.is_err());
    }
}
