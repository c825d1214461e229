//! Command-line tool for operating a call queue engine instance: submit
//! jobs, check status, and watch queue metrics. Talks to an embedding
//! service's ingress surface over HTTP; this binary carries no engine state
//! of its own.

use std::collections::HashMap;

use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Deserialize;
use serde_json::Value;
use tabled::{Table, Tabled};

#[derive(Parser)]
#[command(name = "callq", about = "Operate a call queue engine instance")]
struct Cli {
    /// Base URL of the engine's ingress HTTP surface.
    #[arg(long, env = "CALLQ_API_URL", default_value = "http://127.0.0.1:8080")]
    api_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a single call job.
    Submit {
        id: String,
        phone_number: String,
        campaign_id: String,
        answer_url: String,
        #[arg(long, default_value = "normal")]
        priority: String,
    },
    /// Look up a job's current status.
    Status { id: String },
    /// Show queue-wide metrics.
    Metrics,
}

#[derive(Debug, Deserialize, Tabled)]
struct StatusRow {
    id: String,
    status: String,
    priority: String,
    retry_count: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Command::Submit {
            id,
            phone_number,
            campaign_id,
            answer_url,
            priority,
        } => {
            let mut call_config = HashMap::new();
            call_config.insert("answer_url".to_string(), Value::String(answer_url));

            let body = serde_json::json!({
                "id": id,
                "phone_number": phone_number,
                "campaign_id": campaign_id,
                "priority": priority,
                "call_config": call_config,
            });

            let res = client
                .post(format!("{}/jobs", cli.api_url))
                .json(&body)
                .send()
                .await?;

            if res.status().is_success() {
                println!("{} submitted {}", "✓".green(), id);
            } else {
                eprintln!("{} submit failed: {}", "✗".red(), res.status());
            }
        }
        Command::Status { id } => {
            let res = client
                .get(format!("{}/jobs/{}", cli.api_url, id))
                .send()
                .await?;
            if res.status() == reqwest::StatusCode::NOT_FOUND {
                println!("no such job: {id}");
                return Ok(());
            }
            let row: StatusRow = res.json().await?;
            println!("{}", Table::new(vec![row]));
        }
        Command::Metrics => {
            let res = client
                .get(format!("{}/metrics", cli.api_url))
                .send()
                .await?;
            let metrics: Value = res.json().await?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
    }

    Ok(())
}
