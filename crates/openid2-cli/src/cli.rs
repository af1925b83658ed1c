use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "openid2")]
#[command(about = "OpenID 2.0 relying party: start and complete logins from the shell")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./openid2.toml)
    #[arg(short, long, global = true, env = "OPENID2_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,

    /// Log filter, overrides the configured level (RUST_LOG wins over both)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a login with a configured provider
    Start(StartArgs),
    /// Start a login with a user-supplied identifier (URL or XRI)
    StartDirect(StartDirectArgs),
    /// Verify the provider's redirect and print the identity
    Complete(CompleteArgs),
    /// Run discovery and print the provider endpoints
    Discover(DiscoverArgs),
    /// List configured providers
    Providers,
}

#[derive(clap::Args)]
pub struct StartArgs {
    /// Provider name from the configuration (e.g. google)
    pub service: String,
    #[command(flatten)]
    pub flow: FlowArgs,
}

#[derive(clap::Args)]
pub struct StartDirectArgs {
    /// OpenID identifier, e.g. https://alice.example.com/ or =alice
    pub identifier: String,
    #[command(flatten)]
    pub flow: FlowArgs,
}

#[derive(clap::Args)]
pub struct FlowArgs {
    /// URL the provider redirects back to
    #[arg(long)]
    pub return_url: String,
    /// Where to store the session state until completion
    #[arg(long, default_value = "openid2-state.json")]
    pub state_file: PathBuf,
    /// Print the auto-submitting HTML form instead of the redirect URL
    #[arg(long)]
    pub form: bool,
}

#[derive(clap::Args)]
pub struct CompleteArgs {
    /// Session state written by `start`
    #[arg(long, default_value = "openid2-state.json")]
    pub state_file: PathBuf,
    /// Full URL the provider redirected the browser to
    #[arg(long)]
    pub callback_url: String,
}

#[derive(clap::Args)]
pub struct DiscoverArgs {
    /// Provider name or OpenID identifier
    pub target: String,
}
