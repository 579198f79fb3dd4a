use clap::Parser;
use tracing_subscriber::EnvFilter;

use a3s_linkguard::cli::{load_config, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("a3s_linkguard=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check {
            urls,
            config,
            endpoint,
            base,
        } => {
            let config = load_config(config.as_ref(), endpoint)?;
            a3s_linkguard::cli::check::execute(&urls, base.as_deref(), &config).await?;
        }
        Commands::Config { config } => {
            a3s_linkguard::cli::config::execute(config.as_ref())?;
        }
    }

    Ok(())
}
