// QueueDeck CLI - talks to the daemon over its HTTP API

mod client;
mod sse;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tabled::{Table, Tabled};

use client::ApiClient;
use sse::{SseEvent, SseParser};

#[derive(Parser)]
#[command(name = "qdeck")]
#[command(about = "QueueDeck CLI - inspect and control job queues", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Daemon base URL
    #[arg(long, env = "QUEUEDECK_URL", default_value = "http://127.0.0.1:8520")]
    url: String,

    /// API key sent as x-api-key
    #[arg(long, env = "QUEUEDECK_API_KEY")]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured queues with their job counts
    Queues,

    /// Show job counts of one queue
    Counts { queue: String },

    /// List jobs of a queue (newest first)
    Jobs {
        queue: String,

        /// Comma-separated states (waiting,active,completed,failed,delayed)
        #[arg(short, long)]
        state: Option<String>,

        #[arg(long, default_value = "0")]
        start: usize,

        /// Inclusive end index
        #[arg(long)]
        end: Option<usize>,
    },

    /// Show one job
    Job { queue: String, id: String },

    /// Add a job
    Add {
        queue: String,
        name: String,

        /// Job payload as JSON
        #[arg(short, long, default_value = "{}")]
        data: String,

        #[arg(long)]
        attempts: Option<u32>,

        /// Delay in milliseconds
        #[arg(long)]
        delay: Option<u64>,

        #[arg(long)]
        priority: Option<i32>,
    },

    /// Stop workers from taking new jobs
    Pause { queue: String },

    /// Let workers take jobs again
    Resume { queue: String },

    /// Remove waiting jobs
    Drain {
        queue: String,

        /// Also remove delayed jobs
        #[arg(long)]
        delayed: bool,
    },

    /// Move finished jobs back to waiting
    Retry {
        queue: String,

        #[arg(short, long, default_value = "failed")]
        state: String,

        /// 0 retries all matching jobs
        #[arg(short, long, default_value = "0")]
        count: usize,
    },

    /// Remove old jobs in a state
    Clean {
        queue: String,

        #[arg(long, default_value = "0")]
        grace_ms: u64,

        /// 0 means no limit
        #[arg(long, default_value = "0")]
        limit: usize,

        #[arg(short, long, default_value = "completed")]
        state: String,
    },

    /// Follow the event stream of a queue
    Watch { queue: String },
}

#[derive(Debug, Deserialize)]
struct JobCounts {
    waiting: u64,
    active: u64,
    completed: u64,
    failed: u64,
    delayed: u64,
}

#[derive(Debug, Deserialize)]
struct QueueSummary {
    name: String,
    paused: bool,
    counts: JobCounts,
}

#[derive(Tabled)]
struct QueueRow {
    #[tabled(rename = "Queue")]
    name: String,
    #[tabled(rename = "Paused")]
    paused: bool,
    #[tabled(rename = "Waiting")]
    waiting: u64,
    #[tabled(rename = "Active")]
    active: u64,
    #[tabled(rename = "Completed")]
    completed: u64,
    #[tabled(rename = "Failed")]
    failed: u64,
    #[tabled(rename = "Delayed")]
    delayed: u64,
}

impl From<QueueSummary> for QueueRow {
    fn from(q: QueueSummary) -> Self {
        Self {
            name: q.name,
            paused: q.paused,
            waiting: q.counts.waiting,
            active: q.counts.active,
            completed: q.counts.completed,
            failed: q.counts.failed,
            delayed: q.counts.delayed,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    id: String,
    name: String,
    state: String,
    attempts_made: u32,
    #[serde(default)]
    progress: Value,
    #[serde(default)]
    failed_reason: Option<String>,
}

#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Progress")]
    progress: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl From<Job> for JobRow {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            name: job.name,
            state: job.state,
            attempts: job.attempts_made,
            progress: job.progress.to_string(),
            reason: job.failed_reason.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct CleanResponse {
    removed: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = ApiClient::new(&cli.url, cli.api_key);

    match cli.command {
        Commands::Queues => {
            let queues: Vec<QueueSummary> = client.get("/queues").await?;
            if queues.is_empty() {
                println!("{}", "No queues configured".yellow());
            } else {
                let rows: Vec<QueueRow> = queues.into_iter().map(QueueRow::from).collect();
                println!("{}", Table::new(rows));
            }
        }

        Commands::Counts { queue } => {
            let summary: QueueSummary = client.get(&format!("/queues/{}", queue)).await?;
            let paused = summary.paused;
            println!("{}", Table::new(vec![QueueRow::from(summary)]));
            if paused {
                println!("{}", "Queue is paused".yellow());
            }
        }

        Commands::Jobs {
            queue,
            state,
            start,
            end,
        } => {
            let mut path = format!("/queues/{}/jobs?start={}", queue, start);
            if let Some(end) = end {
                path.push_str(&format!("&end={}", end));
            }
            if let Some(state) = state {
                path.push_str(&format!("&state={}", state));
            }
            let jobs: Vec<Job> = client.get(&path).await?;
            if jobs.is_empty() {
                println!("{}", "No jobs".yellow());
            } else {
                let rows: Vec<JobRow> = jobs.into_iter().map(JobRow::from).collect();
                println!("{}", Table::new(rows));
            }
        }

        Commands::Job { queue, id } => {
            let job: Value = client.get(&format!("/queues/{}/jobs/{}", queue, id)).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }

        Commands::Add {
            queue,
            name,
            data,
            attempts,
            delay,
            priority,
        } => {
            let data: Value = serde_json::from_str(&data).context("--data must be valid JSON")?;
            let body = json!({
                "name": name,
                "data": data,
                "opts": job_options(attempts, delay, priority),
            });
            let job: Job = client.post(&format!("/queues/{}/jobs", queue), body).await?;
            println!("{}", "✓ Job added".green().bold());
            println!("  ID:    {}", job.id.cyan());
            println!("  State: {}", job.state);
        }

        Commands::Pause { queue } => {
            let _: QueueSummary = client
                .post(&format!("/queues/{}/pause", queue), json!({}))
                .await?;
            println!("{}", format!("✓ Queue {} paused", queue).green().bold());
        }

        Commands::Resume { queue } => {
            let _: QueueSummary = client
                .post(&format!("/queues/{}/resume", queue), json!({}))
                .await?;
            println!("{}", format!("✓ Queue {} resumed", queue).green().bold());
        }

        Commands::Drain { queue, delayed } => {
            let res: CountResponse = client
                .post(&format!("/queues/{}/drain", queue), json!({ "delayed": delayed }))
                .await?;
            println!("{}", format!("✓ Removed {} job(s)", res.count).green().bold());
        }

        Commands::Retry {
            queue,
            state,
            count,
        } => {
            let res: CountResponse = client
                .post(
                    &format!("/queues/{}/retry", queue),
                    json!({ "state": state, "count": count }),
                )
                .await?;
            println!("{}", format!("✓ Retried {} job(s)", res.count).green().bold());
        }

        Commands::Clean {
            queue,
            grace_ms,
            limit,
            state,
        } => {
            let res: CleanResponse = client
                .post(
                    &format!("/queues/{}/clean", queue),
                    json!({ "grace_ms": grace_ms, "limit": limit, "state": state }),
                )
                .await?;
            println!("{}", format!("✓ Cleaned {} job(s)", res.removed.len()).green().bold());
        }

        Commands::Watch { queue } => {
            watch(&client, &queue).await?;
        }
    }

    Ok(())
}

/// Explicit options only when a flag was given; otherwise queue defaults apply
fn job_options(attempts: Option<u32>, delay: Option<u64>, priority: Option<i32>) -> Value {
    if attempts.is_none() && delay.is_none() && priority.is_none() {
        return Value::Null;
    }
    json!({
        "attempts": attempts.unwrap_or(1),
        "delay": delay.unwrap_or(0),
        "priority": priority.unwrap_or(0),
    })
}

async fn watch(client: &ApiClient, queue: &str) -> Result<()> {
    let response = client.stream(&format!("/queues/{}/events", queue)).await?;
    println!("{}", format!("Watching {} (Ctrl+C to stop)", queue).bold());

    let mut parser = SseParser::default();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.context("Event stream interrupted")?;
        for event in parser.feed(&chunk) {
            print_event(&event);
        }
    }

    println!("{}", "Stream closed by server".yellow());
    Ok(())
}

fn print_event(event: &SseEvent) {
    let id = event.id.as_deref().unwrap_or("-");
    let name = match event.event.as_str() {
        "completed" => event.event.green(),
        "failed" | "error" => event.event.red(),
        "stalled" => event.event.magenta(),
        "heartbeat" => event.event.dimmed(),
        "counts" => event.event.cyan(),
        _ => event.event.normal(),
    };
    println!("[{}] {} {}", id.dimmed(), name.bold(), event.data);
}
