use clap::Parser;
use floodlab::cli::{Cli, Commands};
use floodlab::{config, logger, roles};
use log::{error, info};
use std::process;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logger::init_logger(cli.debug);

    info!(
        "Starting Floodlab v{} - distributed denial-of-service lab",
        env!("CARGO_PKG_VERSION")
    );

    match run_command(cli).await {
        Ok(_) => {
            info!("Floodlab finished");
            process::exit(0);
        }
        Err(e) => {
            error!("Floodlab failed: {e}");
            process::exit(1);
        }
    }
}

async fn run_command(cli: Cli) -> Result<(), String> {
    match cli.command {
        Commands::Controller { config } => {
            let config = config::load_config(config.as_deref())?;
            roles::controller_command(&config).await
        }
        Commands::Agent { controller, config } => {
            let config = config::load_config(config.as_deref())?;
            roles::agent_command(&controller, &config).await
        }
        Commands::Target { log_file } => roles::target_command(log_file).await,
    }
}
