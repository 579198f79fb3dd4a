use super::load_config;
use crate::error::Result;
use std::path::PathBuf;

/// Execute the `config` command: print the effective configuration.
pub fn execute(path: Option<&PathBuf>) -> Result<()> {
    let config = load_config(path, None)?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}
