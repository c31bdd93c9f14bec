use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use ferry_client::{ClientConfig, ControlClient, Downloads, check_outcome};

#[derive(Parser, Debug)]
#[command(name = "ferry-client", version, about = "Download files from a ferry server")]
struct Cli {
    /// Server control endpoint (overrides FERRY_SERVER)
    #[arg(long)]
    server: Option<std::net::SocketAddr>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the files the server offers
    List,
    /// Download one or more files concurrently
    Get {
        #[arg(required = true)]
        names: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_client=info,ferry_transfer=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env()?;
    if let Some(server) = cli.server {
        config.server = server;
    }

    let mut control = ControlClient::connect(config.server)?;
    info!("connected to {}", control.peer_addr());

    let outcome = match cli.command {
        Commands::List => {
            let names = control.list_files()?;
            println!("{} file(s):", names.len());
            for name in names {
                println!("  {}", name);
            }
            Ok(())
        }
        Commands::Get { names } => {
            let downloads = Arc::new(Downloads::new(config));
            let interrupted = downloads.clone();
            ctrlc::set_handler(move || {
                info!("Received Ctrl+C, cancelling downloads...");
                interrupted.cancel_all();
            })?;

            let mut refused = 0;
            for name in &names {
                if let Err(e) = downloads.start(&mut control, name) {
                    warn!("{}: {}", name, e);
                    refused += 1;
                }
            }
            let results = downloads.wait_all();
            check_outcome(&results, refused)
        }
    };

    control.quit()?;
    // A failed download exits non-zero.
    outcome?;
    Ok(())
}
