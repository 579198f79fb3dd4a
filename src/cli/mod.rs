pub mod check;
pub mod config;

use crate::config::GuardConfig;
use crate::error::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// A3S LinkGuard - Check links against a threat-intelligence source
#[derive(Debug, Parser)]
#[command(name = "a3s-linkguard", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Verify one or more URLs and print their verdicts as JSON
    Check {
        /// URLs to check (relative URLs need --base)
        #[arg(required = true)]
        urls: Vec<String>,

        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Threat source endpoint, overriding the config file
        #[arg(long)]
        endpoint: Option<String>,

        /// Base URL for resolving relative URLs
        #[arg(long)]
        base: Option<String>,
    },

    /// Print the effective configuration as TOML
    Config {
        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Load the config file if given, apply the endpoint override and validate
pub fn load_config(path: Option<&PathBuf>, endpoint: Option<String>) -> Result<GuardConfig> {
    let mut config = match path {
        Some(path) => GuardConfig::load(path)?,
        None => GuardConfig::default(),
    };
    if endpoint.is_some() {
        config.endpoint = endpoint;
    }
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_check() {
        let cli = Cli::try_parse_from([
            "a3s-linkguard",
            "check",
            "https://a.example/",
            "/relative",
            "--base",
            "https://mail.google.com/",
        ])
        .unwrap();
        match cli.command {
            Commands::Check { urls, base, .. } => {
                assert_eq!(urls.len(), 2);
                assert_eq!(base.as_deref(), Some("https://mail.google.com/"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_check_requires_urls() {
        assert!(Cli::try_parse_from(["a3s-linkguard", "check"]).is_err());
    }

    #[test]
    fn test_load_config_endpoint_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("linkguard.toml");
        std::fs::write(&path, "endpoint = \"https://old.example/lookup\"\n").unwrap();

        let config = load_config(Some(&path), Some("https://new.example/lookup".into())).unwrap();
        assert_eq!(config.endpoint.as_deref(), Some("https://new.example/lookup"));

        let config = load_config(Some(&path), None).unwrap();
        assert_eq!(config.endpoint.as_deref(), Some("https://old.example/lookup"));
    }

    #[test]
    fn test_load_config_rejects_bad_override() {
        assert!(load_config(None, Some("not a url".into())).is_err());
    }
}
