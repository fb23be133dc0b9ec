//! medledger CLI Entry Point

use clap::Parser;
use medledger::cli::{Cli, Commands};
use medledger::config::LedgerConfig;
use medledger::logging;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let mut config = match LedgerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(async {
        match &cli.command {
            Commands::Verify(args) => medledger::cli::verify::execute(args, &config).await,
            Commands::Blocks(args) => medledger::cli::blocks::execute(args, &config).await,
            Commands::Pending(args) => {
                medledger::cli::outbox::execute_pending(args, &config).await
            }
            Commands::Drain(args) => medledger::cli::outbox::execute_drain(args, &config).await,
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
