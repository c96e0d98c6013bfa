use tabula::{config, orchestrator::Orchestrator, server, storage::Database};
use tracing::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    human_panic::setup_panic!();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tabula=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!("🔢 Starting Tabula...");
    let config = config::Config::from_env()?;
    info!("⚙️ Launch configuration:\n{}", config);
    let database = Database::open(&config)?;
    server::start_server(&config, Orchestrator::new(database)).await
}
