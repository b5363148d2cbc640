//! Clap CLI definitions for Agora.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  agora register                    Register and keep the node alive until Ctrl-C
  agora demand temp --json '{}'     Broadcast a demand on the configured channel
  agora supply taxi --channel 10    Broadcast a supply on channel 10
  agora watch demand                Print demands arriving on the channel";

/// Agora: demand/supply exchange network node.
#[derive(Parser)]
#[command(name = "agora", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file (defaults to ~/.agora/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register with the directory and keep heartbeating until Ctrl-C.
    Register,
    /// Broadcast a demand.
    Demand {
        /// Demand name.
        name: String,
        /// JSON argument attached to the demand.
        #[arg(long, default_value = "{}")]
        json: String,
        /// Channel type (defaults to the first configured one).
        #[arg(long)]
        channel: Option<u32>,
    },
    /// Broadcast a supply.
    Supply {
        /// Supply name.
        name: String,
        /// JSON argument attached to the supply.
        #[arg(long, default_value = "{}")]
        json: String,
        /// Channel type (defaults to the first configured one).
        #[arg(long)]
        channel: Option<u32>,
    },
    /// Print records arriving on a channel until Ctrl-C.
    Watch {
        /// Which records to receive.
        kind: WatchKind,
        /// Channel type (defaults to the first configured one).
        #[arg(long)]
        channel: Option<u32>,
        /// Print each record as one line of JSON.
        #[arg(long)]
        raw: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum WatchKind {
    Demand,
    Supply,
}
