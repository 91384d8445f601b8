mod args;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use args::{CliArgs, Commands};
use commands::{cmd_plugins, cmd_policy, cmd_review, cmd_serve};

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();
    let config = cli.config.as_deref();

    let result = match cli.command {
        Commands::Plugins => cmd_plugins(cli.output),
        Commands::Policy => cmd_policy(config, cli.output),
        Commands::Review(args) => cmd_review(config, args, cli.output),
        Commands::Serve(args) => cmd_serve(config, args).await,
    };
    if let Err(err) = &result {
        error!("Command failed: {err:#}");
    }
    result
}
