//! relayhub CLI
//!
//! Command-line interface for a running relayhub server:
//! - Push messages to users
//! - Inspect hubs and sessions
//! - Check health
//! - Generate a config file

use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "relayhub-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Command-line client for the relayhub session broker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// API server URL
    #[arg(long, default_value = "http://localhost:8090", global = true)]
    pub api_url: String,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Push a message to users of an application
    Push {
        /// Application id
        app_id: String,
        /// Message body
        message: String,
        /// Target user (repeatable; none = every user)
        #[arg(short, long = "user")]
        users: Vec<String>,
        /// Only sessions whose connect parameters match, in key=value format
        #[arg(short = 'P', long = "param")]
        params: Vec<String>,
        /// Send as a binary frame
        #[arg(long)]
        binary: bool,
    },

    /// List hubs, or show one hub's sessions
    Hubs {
        /// Application id
        app_id: Option<String>,
    },

    /// Show server health
    Status,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Push {
            app_id,
            message,
            users,
            params,
            binary,
        } => {
            let params = parse_params(&params)?;
            let body = serde_json::json!({
                "app_id": &app_id,
                "user_ids": users,
                "message": message,
                "kind": if binary { "binary" } else { "text" },
                "params": params,
            });

            let response = client
                .post(format!("{}/api/v1/push", cli.api_url))
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            let result: serde_json::Value = response.json().await?;
            if !status.is_success() {
                eprintln!(
                    "Push failed ({}): {}",
                    status,
                    result["error"]["message"].as_str().unwrap_or("unknown error")
                );
                std::process::exit(1);
            }

            if cli.format == "json" {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!(
                    "Queued {} for {}",
                    result["envelope_id"].as_str().unwrap_or("?"),
                    result["app_id"].as_str().unwrap_or(&app_id)
                );
            }
        }

        Commands::Hubs { app_id } => {
            let url = match &app_id {
                Some(id) => format!("{}/api/v1/hubs/{}", cli.api_url, id),
                None => format!("{}/api/v1/hubs", cli.api_url),
            };

            let response = client.get(url).send().await?;
            let status = response.status();
            let data: serde_json::Value = response.json().await?;
            if !status.is_success() {
                eprintln!(
                    "Request failed ({}): {}",
                    status,
                    data["error"]["message"].as_str().unwrap_or("unknown error")
                );
                std::process::exit(1);
            }

            if cli.format == "json" {
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else if app_id.is_some() {
                print_hub_detail(&data);
            } else {
                print_hub_table(&data);
            }
        }

        Commands::Status => {
            let response = client
                .get(format!("{}/health", cli.api_url))
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let health: serde_json::Value = resp.json().await?;

                    if cli.format == "json" {
                        println!("{}", serde_json::to_string_pretty(&health)?);
                        return Ok(());
                    }

                    println!(
                        "relayhub v{}",
                        health["version"].as_str().unwrap_or(env!("CARGO_PKG_VERSION"))
                    );
                    println!();
                    println!("Status:   {}", health["status"].as_str().unwrap_or("unknown"));
                    println!("Hubs:     {}", health["hubs"].as_u64().unwrap_or(0));
                    println!("Sessions: {}", health["sessions"].as_u64().unwrap_or(0));

                    if let Some(uptime) = health["uptime_seconds"].as_u64() {
                        println!("Uptime:   {}", format_duration(uptime));
                    }
                }
                Ok(resp) => {
                    eprintln!("Server unhealthy: HTTP {}", resp.status());
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("Cannot reach server at {}: {}", cli.api_url, e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Config { output } => {
            let config = relayhub::config::generate_default_config();

            match output {
                Some(path) => {
                    // Create parent directory if needed
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &config)?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", config);
                }
            }
        }
    }

    Ok(())
}

/// Parse `key=value` pairs
fn parse_params(pairs: &[String]) -> Result<HashMap<String, String>, Box<dyn std::error::Error>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(format!("Invalid parameter: {}. Use key=value", pair).into()),
        })
        .collect()
}

fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else if seconds < 86400 {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    } else {
        format!("{}d {}h", seconds / 86400, (seconds % 86400) / 3600)
    }
}

fn print_hub_table(data: &serde_json::Value) {
    let hubs = data["hubs"].as_array().cloned().unwrap_or_default();
    if hubs.is_empty() {
        println!("No hubs");
        return;
    }

    println!("{:<24} {:<8} {:>6} {:>9}", "APP", "STATE", "USERS", "SESSIONS");
    println!("{}", "-".repeat(50));
    for hub in &hubs {
        println!(
            "{:<24} {:<8} {:>6} {:>9}",
            hub["app_id"].as_str().unwrap_or("?"),
            hub["state"].as_str().unwrap_or("?"),
            hub["users"].as_u64().unwrap_or(0),
            hub["sessions"].as_u64().unwrap_or(0)
        );
    }
    println!();
    println!("Total sessions: {}", data["total_sessions"].as_u64().unwrap_or(0));
}

fn print_hub_detail(hub: &serde_json::Value) {
    println!(
        "{} ({})",
        hub["app_id"].as_str().unwrap_or("?"),
        hub["state"].as_str().unwrap_or("?")
    );

    let Some(users) = hub["sessions_by_user"].as_object() else {
        return;
    };
    for (user, sessions) in users {
        let ids: Vec<&str> = sessions
            .as_array()
            .map(|s| s.iter().filter_map(|id| id.as_str()).collect())
            .unwrap_or_default();
        println!("  {:<24} {}", user, ids.join(", "));
    }
}
