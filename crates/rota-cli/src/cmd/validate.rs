//! `rota validate`: run the six state checks and report.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use rota_core::catalog::CatalogDir;
use rota_core::repository::StateRepository;
use rota_core::validate::{ValidateOptions, Validator, validate_repository};

use super::Context;
use crate::output::render;

#[derive(Args, Debug, Default)]
pub struct ValidateArgs {
    /// Remove posted ids that are not in the catalog and save the result.
    #[arg(long)]
    pub fix: bool,

    /// Limit id, cycle and consistency checks to one category.
    #[arg(long, value_name = "NAME")]
    pub category: Option<String>,

    /// Also write a Markdown report to this path.
    #[arg(long, value_name = "PATH")]
    pub report_file: Option<PathBuf>,
}

/// Execute `rota validate`. Fails when the state is invalid.
pub fn run_validate(args: &ValidateArgs, ctx: &Context) -> Result<()> {
    let category = match &args.category {
        Some(name) => Some(ctx.category(name)?.plural.clone()),
        None => None,
    };

    let repo = StateRepository::from_config(&ctx.config);
    let catalogs = CatalogDir::from_config(&ctx.config);
    let validator = Validator::new(&ctx.config.validation, &ctx.config.categories, &catalogs);
    let options = ValidateOptions {
        fix: args.fix,
        category,
        ..ValidateOptions::default()
    };

    let mut report = validate_repository(&repo, &validator, &options);

    if let Some(path) = &args.report_file {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(path, report.to_markdown())
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        report.saved = Some(path.display().to_string());
    }

    let verbose = ctx.verbose;
    render(ctx.output, &report, |r, w| {
        write!(w, "{}", r.to_text(verbose))?;
        if let Some(saved) = &r.saved {
            writeln!(w, "report written to {saved}")?;
        }
        Ok(())
    })?;

    if !report.valid {
        anyhow::bail!("validation failed");
    }
    Ok(())
}
