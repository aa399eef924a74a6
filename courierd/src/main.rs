use clap::{Parser, Subcommand};
use rst_common::with_tokio::tokio;

use prople_courierd::errors::CourierError;
use prople_courierd::svc::agent::AgentServer;

#[derive(Parser)]
#[command(name = "courierd")]
#[command(version = "0.1")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(name = "agent")]
    #[command(about = "Running DIDComm agent server")]
    Agent {
        #[arg(short, long, value_name = "FILE")]
        #[arg(required = true)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), CourierError> {
    let cli = Cli::parse();
    match &cli.command {
        Commands::Agent { config } => {
            let config = config
                .to_owned()
                .ok_or(CourierError::AgentError("missing config file".to_string()))?;

            let svc = AgentServer::new(config).svc()?;
            svc.serve().await?;
        }
    }

    Ok(())
}
