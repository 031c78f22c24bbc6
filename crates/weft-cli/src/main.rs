//! weft CLI — run, initialize and poke at a fabric node from the terminal.

mod cli;

use anyhow::{bail, Context};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::PathBuf;
use tracing::info;
use weft_node::{default_config_path, load_config, write_default_config, Fabric, Role};

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

fn parse_role(s: &str) -> anyhow::Result<Role> {
    match s {
        "coordinator" => Ok(Role::Coordinator),
        "worker" => Ok(Role::Worker),
        "standalone_peer" => Ok(Role::StandalonePeer),
        other => bail!("unknown role '{other}' (expected coordinator, worker or standalone_peer)"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path: PathBuf = cli.config.unwrap_or_else(default_config_path);

    if let Commands::Init = cli.command {
        // Init runs before tracing setup; its output is for humans.
        write_default_config(&config_path)
            .with_context(|| format!("initializing {}", config_path.display()))?;
        println!("wrote {}", config_path.display());
        return Ok(());
    }

    let config = load_config(&config_path);
    init_tracing(&config.log_level);

    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Start => {
            let fabric = Fabric::new(config);
            fabric.start().await.context("starting fabric")?;
            info!(node = %fabric.node_id(), role = %fabric.role(), "node running, Ctrl+C to stop");
            tokio::signal::ctrl_c().await.context("waiting for Ctrl+C")?;
            fabric.stop().await.context("stopping fabric")?;
        }
        Commands::Send { to, message } => {
            let fabric = Fabric::new(config);
            fabric.start().await.context("starting fabric")?;
            let reply = fabric
                .send(to.as_str().into(), message.into_bytes())
                .await
                .with_context(|| format!("sending to {to}"))?;
            match reply {
                Some(envelope) => {
                    println!("{}", String::from_utf8_lossy(&envelope.payload));
                }
                None => info!(to, "message sent"),
            }
            fabric.stop().await.context("stopping fabric")?;
        }
        Commands::Assign { node, role } => {
            let role = parse_role(&role)?;
            let fabric = Fabric::new(config);
            fabric.start().await.context("starting fabric")?;
            fabric
                .assign_role(&node.as_str().into(), role)
                .await
                .with_context(|| format!("assigning {role} to {node}"))?;
            info!(%node, %role, "role assignment sent");
            fabric.stop().await.context("stopping fabric")?;
        }
    }
    Ok(())
}
