use anyhow::Result;
use colored::Colorize;
use openid2_rp::OpenIdConfig;

use crate::cli::OutputFormat;
use crate::output::print_json;

pub fn list(config: &OpenIdConfig, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&config.providers),
        OutputFormat::Text => {
            if config.providers.is_empty() {
                println!("No providers configured.");
                return Ok(());
            }
            for (name, provider) in &config.providers {
                let status = if provider.enabled {
                    "enabled".green()
                } else {
                    "disabled".red()
                };
                println!(
                    "{} [{}] {}",
                    name.cyan(),
                    status,
                    provider.display_name.as_deref().unwrap_or("")
                );
                println!(
                    "  {}",
                    provider.discovery.as_deref().unwrap_or("(no discovery URL)")
                );
            }
        }
    }
    Ok(())
}
