use anyhow::Context;
use arcade_client_core::telemetry::logging;
use arcade_client_core::terminal::{app, cli::Cli};
use clap::Parser;
use tracing::debug;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_config = cli.logging.to_config();
    logging::init(&log_config).context("failed to initialize logging")?;
    debug!(log_level = log_config.level.as_str(), log_file = ?log_config.file, "logging configured");

    app::run(cli).await.context("arcade client exited with an error")
}
