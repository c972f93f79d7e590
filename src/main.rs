//! zookeeper-assistant: health checks and transaction-log backups for a
//! ZooKeeper node.

use anyhow::Result;
use clap::Parser;
use tracing::error;

use zookeeper_assistant::{logging, AssistantConfig, BackupServer, Cli, HealthProbe, Mode};

#[tokio::main]
async fn main() {
    let config = AssistantConfig::from(Cli::parse());
    logging::init(config.verbose);

    if let Err(err) = run(&config).await {
        error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(config: &AssistantConfig) -> Result<()> {
    match config.mode {
        Mode::Health => {
            HealthProbe::from_config(config).probe().await?;
        },
        Mode::Backup => {
            let request = config.backup_request()?;
            BackupServer::start(config.listen, request).await?;
        },
    }
    Ok(())
}
