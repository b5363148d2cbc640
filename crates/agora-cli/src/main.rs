//! Agora CLI: register a node, advertise demand and supply, and watch channels.

mod cli;
mod cmd;
mod ui;

use crate::cli::{Cli, Commands};
use agora_node::config::load_config;
use clap::Parser;

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr();

    let config = load_config(cli.config.as_deref());

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            ui::error(&format!("Failed to start async runtime: {e}"));
            std::process::exit(1);
        }
    };

    let result = rt.block_on(async move {
        match cli.command {
            Commands::Register => cmd::cmd_register(config).await,
            Commands::Demand {
                name,
                json,
                channel,
            } => cmd::cmd_demand(config, name, json, channel).await,
            Commands::Supply {
                name,
                json,
                channel,
            } => cmd::cmd_supply(config, name, json, channel).await,
            Commands::Watch { kind, channel, raw } => {
                cmd::cmd_watch(config, kind, channel, raw).await
            }
        }
    });

    if let Err(e) = result {
        ui::error(&e.to_string());
        std::process::exit(1);
    }
}
