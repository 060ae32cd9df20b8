use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dhcpkv::{Config, DhcpServer, Result};

#[derive(Parser)]
#[command(name = "dhcpkv")]
#[command(author, version, about = "A DHCP server with leases in a shared key-value store", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve DHCP on UDP port 67 (default)
    Run,
    /// Print the effective configuration as JSON
    ShowConfig,
    /// Print every lease recorded in the store
    ListLeases {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = Config::load_or_create(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!("Starting DHCP server with config: {:?}", cli.config);
            let server = DhcpServer::new(config).await?;

            tokio::select! {
                result = server.run() => result,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal, stopping server...");
                    Ok(())
                }
            }
        }
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::ListLeases { json } => {
            let store = dhcpkv::server::open_store(&config).await?;
            let mut leases = store.list_leases().await?;
            leases.sort_by_key(|lease| lease.ip_address);

            if json {
                println!("{}", serde_json::to_string_pretty(&leases)?);
            } else if leases.is_empty() {
                println!("No active leases.");
            } else {
                println!("{:<24} {:<16}", "Client ID", "IP Address");
                println!("{}", "-".repeat(40));

                for lease in leases {
                    println!("{:<24} {:<16}", lease.client_id, lease.ip_address);
                }
            }

            Ok(())
        }
    }
}
