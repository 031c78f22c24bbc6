//! Clap CLI definitions for weft.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// weft — a distributed communication fabric.
#[derive(Parser)]
#[command(name = "weft", version, about = "weft \u{2014} distributed communication fabric")]
pub struct Cli {
    /// Path to config file (default: ~/.weft/weft.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default config file (refuses to overwrite).
    Init,
    /// Run a fabric node until interrupted.
    Start,
    /// Send one message to a peer and print the reply, if any.
    Send {
        /// Recipient node ID.
        to: String,
        /// Message payload (sent as UTF-8 bytes).
        message: String,
    },
    /// Issue a role assignment to a peer in `auto` mode.
    Assign {
        /// Target node ID.
        node: String,
        /// Role to assign: coordinator, worker or standalone_peer.
        role: String,
    },
}
