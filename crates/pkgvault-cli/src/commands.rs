use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use pkgvault_server::{list_listen_addresses, PkgvaultServer, ServerConfig};

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve(args) => cmd_serve(args).await,
        Command::Config(args) => cmd_config(args),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ServerConfig> {
    match path {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(ServerConfig::default()),
    }
}

async fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    tracing::info!(storage = ?config.storage, "starting pkgvault");
    PkgvaultServer::new(config)
        .serve(args.listen.as_deref())
        .await
        .context("server stopped")
}

fn cmd_config(args: ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    if args.check {
        let addresses = list_listen_addresses(None, config.listen.as_ref());
        println!("{} configuration is valid", "✓".green().bold());
        for address in addresses {
            println!("  listen: {}", address.to_string().cyan());
        }
        return Ok(());
    }
    print!("{}", config.to_toml()?);
    Ok(())
}
