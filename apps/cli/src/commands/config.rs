//! Config command implementation.

use anyhow::{Context, Result};
use strata_core::StrataConfig;

/// Print the resolved configuration.
pub fn execute(config: &StrataConfig) -> Result<()> {
    let rendered = config.to_toml_string().context("Failed to render configuration")?;
    print!("{rendered}");
    Ok(())
}
