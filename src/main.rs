mod buffer;
mod cache;
mod config;
mod db;
mod error;
mod mail;
mod models;
mod rpc;
mod script;
mod tasks;
mod telemetry;
mod util;

use clap::Parser;
use tracing::info;

use crate::telemetry::TelemetryConfig;

/// NEO chain indexer: pulls blocks from a fleet of JSON-RPC nodes and
/// maintains the derived relational dataset.
#[derive(Parser, Debug)]
#[command(name = "rustyneo")]
struct Cli {
    /// Enable alert mails on task failures and sync-complete milestones.
    #[arg(long, default_value_t = false)]
    mail: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    telemetry::init_tracing(TelemetryConfig::default())?;
    config::init()?;
    mail::init(cli.mail)?;

    let store = db::Store::connect().await?;
    // Bootstraps the cursor row on a fresh database.
    store.get_counter().await?;

    info!(label = %config::label(), "starting indexer");
    tasks::run(store).await?;

    // The pipeline runs forever; the process is terminated externally.
    std::future::pending::<()>().await;
    unreachable!()
}
