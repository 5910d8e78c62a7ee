use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(name = "trackerctl", about = "tracker daemon inspection CLI")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Daemon status API base URL
    #[arg(short, long, default_value = "http://127.0.0.1:8080", global = true)]
    url: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show election and group status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = reqwest::Client::new();
    let base = args.url.trim_end_matches('/');

    match args.command {
        Commands::Status => {
            let resp: Value = client
                .get(format!("{}/api/status", base))
                .send()
                .await?
                .json()
                .await?;

            println!("Tracker Status");
            println!("══════════════════════════════");
            println!("  Leader index: {}", resp["leader_index"]);
            println!("  Is leader:    {}", resp["is_leader"]);

            if let Some(groups) = resp["groups"].as_array() {
                if groups.is_empty() {
                    println!("  No groups configured");
                }
                for g in groups {
                    println!(
                        "  {} — active: {}, http-eligible: {}, trunk: {}",
                        g["group_name"],
                        g["active_servers"].as_array().map(|a| a.len()).unwrap_or(0),
                        g["http_servers_count"],
                        g["trunk_server"],
                    );
                }
            }
        }
    }

    Ok(())
}
