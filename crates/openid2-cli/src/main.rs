mod cli;
mod commands;
mod observability;
mod output;
mod state;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use openid2_rp::config::loader::load_config_from_path;
use openid2_rp::{OpenIdConfig, OpenIdConsumer, StaticProviderLookup};

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let format = cli.format.unwrap_or_default();

    let config = load_config_from_path(cli.config.as_ref())?;
    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    observability::init_tracing_with_level(level);

    match &cli.command {
        Commands::Start(args) => {
            let consumer = make_consumer(&config)?;
            commands::flow::start(&consumer, &args.service, &args.flow, format).await?;
        }
        Commands::StartDirect(args) => {
            let consumer = make_consumer(&config)?;
            commands::flow::start_direct(&consumer, &args.identifier, &args.flow, format).await?;
        }
        Commands::Complete(args) => {
            let consumer = make_consumer(&config)?;
            commands::flow::complete(&consumer, args, format)?;
        }
        Commands::Discover(args) => {
            let consumer = make_consumer(&config)?;
            commands::discover::discover(&consumer, &args.target, format).await?;
        }
        Commands::Providers => {
            commands::providers::list(&config, format)?;
        }
    }

    Ok(())
}

fn make_consumer(config: &OpenIdConfig) -> Result<OpenIdConsumer> {
    let lookup = StaticProviderLookup::from_config(config);
    Ok(OpenIdConsumer::new(
        config.relying_party.clone(),
        Arc::new(lookup),
    )?)
}
