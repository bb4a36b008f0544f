use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "floodlab",
    about = "Floodlab - a distributed denial-of-service lab for closed networks",
    version,
    long_about = "Runs one of three cooperating roles: a controller that \
                  commands a fleet of agents, agents that flood a target on \
                  instruction, and a target that echoes and records whatever \
                  reaches it. For use on isolated lab networks only."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the command-and-control console
    Controller {
        /// Optional path to a JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Run a flood agent attached to a controller
    Agent {
        /// Controller address as 'host' or 'host:port'
        controller: String,

        /// Optional path to a JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Run the victim target server
    Target {
        /// Append every received line to this file as well as the log
        #[arg(short, long)]
        log_file: Option<PathBuf>,
    },
}
