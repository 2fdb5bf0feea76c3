pub mod create_remote;
pub mod mark;
pub mod pick;
pub mod stats;
pub mod sync;
pub mod validate;

use anyhow::{Context as _, Result};
use rota_core::category::{self, Category};
use rota_core::config::RotaConfig;

use crate::output::{CliError, OutputMode, render_error};

/// What every command handler needs besides its own arguments.
#[derive(Debug)]
pub struct Context {
    pub config: RotaConfig,
    pub output: OutputMode,
    pub verbose: bool,
}

impl Context {
    /// Look up a configured category by plural or singular name, rendering
    /// the list of valid names when it is unknown.
    pub fn category(&self, name: &str) -> Result<&Category> {
        if let Some(found) = category::find(&self.config.categories, name) {
            return Ok(found);
        }
        let known: Vec<&str> = self
            .config
            .categories
            .iter()
            .map(|c| c.plural.as_str())
            .collect();
        render_error(
            self.output,
            &CliError {
                message: format!("unknown category '{name}'"),
                suggestion: Some(format!("expected one of: {}", known.join(", "))),
                error_code: None,
            },
        )
        .context("render error")?;
        anyhow::bail!("unknown category '{name}'");
    }
}
