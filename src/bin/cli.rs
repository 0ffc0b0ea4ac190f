//! CLI for querying shard assignments

use clap::{Parser, Subcommand};
use shardmaster::common::format_timestamp_millis;
use shardmaster::{Assignment, Host, ShardMasterClient};
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "shardmaster-cli")]
#[command(about = "Query a shard master for replica assignments")]
#[command(version)]
struct Cli {
    /// Shard master RPC address
    #[arg(long, default_value = "127.0.0.1:7000")]
    addr: String,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List datasets
    Datasets,

    /// Assignments of every shard in a dataset
    Dataset {
        /// Dataset name
        name: String,
    },

    /// Assignment of one shard
    Shard {
        /// Dataset name
        dataset: String,

        /// Shard name
        shard: String,
    },

    /// Shards assigned to a host
    Host {
        /// host:port
        host: Host,
    },
}

fn print_assignments(assignments: &[Assignment], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(assignments)?);
        return Ok(());
    }
    for a in assignments {
        let replicas: Vec<String> = a.replicas.iter().map(ToString::to_string).collect();
        let replicas = if replicas.is_empty() {
            "<unassigned>".to_string()
        } else {
            replicas.join(",")
        };
        println!(
            "{}\t{}\t{}",
            a.shard,
            replicas,
            format_timestamp_millis(a.timestamp)
        );
    }
    Ok(())
}

enum Output {
    Datasets(Vec<String>),
    Assignments(Vec<Assignment>),
}

async fn fetch(addr: &str, command: &Commands) -> shardmaster::Result<Output> {
    let mut client = ShardMasterClient::connect(addr).await?;
    let output = match command {
        Commands::Datasets => Output::Datasets(client.datasets().await?),
        Commands::Dataset { name } => Output::Assignments(client.dataset_assignments(name).await?),
        Commands::Shard { dataset, shard } => {
            Output::Assignments(vec![client.shard_assignment(dataset, shard).await?])
        }
        Commands::Host { host } => Output::Assignments(client.host_assignments(host).await?),
    };
    Ok(output)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let mut attempt = 1;
    let output = loop {
        match fetch(&cli.addr, &cli.command).await {
            Ok(output) => break output,
            Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                tracing::warn!("Attempt {} failed, retrying: {}", attempt, e);
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    };

    match output {
        Output::Datasets(datasets) => {
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&datasets)?);
            } else {
                for dataset in datasets {
                    println!("{}", dataset);
                }
            }
        }
        Output::Assignments(assignments) => print_assignments(&assignments, cli.json)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_master_is_retryable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = match fetch(&addr, &Commands::Datasets).await {
            Err(e) => e,
            Ok(_) => panic!("fetch from a closed port succeeded"),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_invalid_request_is_not_retried() {
        let err = shardmaster::Error::InvalidRequest("bad shard name".into());
        assert!(!err.is_retryable());
    }
}
