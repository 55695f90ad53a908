//! Sparsekit CLI - inspect and build sharded embedding checkpoints.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sparsekit_cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("sparsekit=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect(cmd) => cmd.run()?,
        Commands::Build(cmd) => cmd.run()?,
    }

    info!("Sparsekit CLI completed successfully");
    Ok(())
}
