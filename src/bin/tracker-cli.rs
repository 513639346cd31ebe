use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use session_tracker::reconcile::encode_payload;

#[derive(Parser)]
#[command(name = "tracker-cli")]
#[command(about = "Management CLI for the session tracker", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an invocation envelope from a file of record lines
    Encode { file: PathBuf },
    /// Encode a file of record lines and submit it
    Send { file: PathBuf },
    /// Show a user's connection count
    Count { user: String },
    /// List cache node health
    Nodes,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Encode { file } => {
            let envelope = envelope_from_file(&file)?;
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }
        Commands::Send { file } => {
            let envelope = envelope_from_file(&file)?;
            let res = client
                .post(format!("{}/invoke", cli.url))
                .json(&envelope)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Count { user } => {
            let res = client
                .get(format!("{}/users/{}", cli.url, user))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Nodes => {
            let res = client.get(format!("{}/nodes", cli.url)).send().await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

/// One record per non-blank line.
fn envelope_from_file(path: &Path) -> Result<Value, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let lines = content.lines().filter(|line| !line.trim().is_empty());
    let data = encode_payload(lines)?;
    Ok(json!({ "awslogs": { "data": data } }))
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: tracker returned status {}", status);
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
