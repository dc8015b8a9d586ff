use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use owlia_domain::config::Config;

#[derive(Parser)]
#[command(name = "owliabot", version, about = "Chat-driven agent platform")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "owliabot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Start the gateway (default).
    Serve,
    /// Print the effective configuration and exit.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = Arc::new(Config::load(&cli.config)?);
            tracing::info!("OwliaBot starting");
            let runtime = owlia_gateway::startup::build(config).await?;
            owlia_gateway::startup::serve(runtime).await
        }
        Some(Command::Config) => {
            let config = Config::load(&cli.config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,owlia_gateway=debug")),
        )
        .json()
        .init();
}
