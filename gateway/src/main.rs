use clap::Parser;
use tracing_subscriber::EnvFilter;
use ultaai_gateway::config::{Cli, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let settings = Settings::from_cli(cli)?;
    ultaai_gateway::run(settings).await
}
