use anyhow::Result;
use colored::Colorize;
use openid2_rp::{OpenIdConsumer, ServiceKind};

use crate::cli::OutputFormat;
use crate::output::print_json;

pub async fn discover(consumer: &OpenIdConsumer, target: &str, format: OutputFormat) -> Result<()> {
    let resolver = consumer.resolver();
    let target = match resolver.resolve_service(target).await {
        Ok(resolved) => resolved,
        Err(e) if e.is_configuration_error() => resolver.resolve_identifier(target)?,
        Err(e) => return Err(e.into()),
    };

    let endpoints = consumer.discover(&target).await?;

    match format {
        OutputFormat::Json => print_json(&endpoints),
        OutputFormat::Text => {
            println!("{}: {}", "Identifier".cyan(), target.identifier);
            for (i, endpoint) in endpoints.iter().enumerate() {
                let kind = match endpoint.kind {
                    ServiceKind::OpIdentifier => "OP identifier",
                    ServiceKind::ClaimedIdentifier => "claimed identifier",
                };
                println!("{}. {} ({})", i + 1, endpoint.endpoint.as_str().green(), kind);
                if let Some(claimed) = &endpoint.claimed_id {
                    println!("   {}: {}", "claimed_id".cyan(), claimed);
                }
                if let Some(local) = &endpoint.local_id {
                    println!("   {}: {}", "local_id".cyan(), local);
                }
                println!(
                    "   {}: {}",
                    "attribute exchange".cyan(),
                    if endpoint.supports_ax() { "yes" } else { "no" }
                );
            }
        }
    }
    Ok(())
}
