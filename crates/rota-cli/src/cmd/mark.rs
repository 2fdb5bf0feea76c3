//! `rota mark`: record an item as posted.

use std::io::Write;

use anyhow::{Context as _, Result};
use clap::Args;
use rota_core::catalog::{CatalogDir, CatalogSource};
use rota_core::repository::{SaveOutcome, StateRepository};
use rota_core::selector::mark_as_posted;
use serde::Serialize;
use tracing::warn;

use super::Context;
use crate::output::{CliError, render, render_error};

#[derive(Args, Debug)]
pub struct MarkArgs {
    /// Category of the item (plural or singular name).
    pub category: String,

    /// Catalog id of the posted item.
    pub id: String,
}

#[derive(Debug, Serialize)]
struct Marked<'a> {
    category: &'a str,
    id: &'a str,
    posted: usize,
    saved: String,
}

/// Execute `rota mark`.
pub fn run_mark(args: &MarkArgs, ctx: &Context) -> Result<()> {
    let category = ctx.category(&args.category)?;

    match CatalogDir::from_config(&ctx.config).catalog(category) {
        Ok(catalog) if !catalog.contains(&args.id) => {
            warn!(category = %category.plural, id = %args.id, "id is not in the catalog");
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "catalog unreadable; id not checked"),
    }

    let repo = StateRepository::from_config(&ctx.config);
    let mut snapshot = repo.load().context("failed to load state")?;
    let outcome = mark_as_posted(&repo, &mut snapshot, category, &args.id);

    if let SaveOutcome::Unsaved { reason } = &outcome {
        render_error(ctx.output, &CliError::new(format!("state not saved: {reason}")))?;
        anyhow::bail!("state not saved");
    }

    let payload = Marked {
        category: &category.plural,
        id: &args.id,
        posted: snapshot.category(&category.plural).map_or(0, |s| s.posted.len()),
        saved: outcome.to_string(),
    };
    render(ctx.output, &payload, |m, w: &mut dyn Write| {
        writeln!(w, "marked {} in {} ({} posted, {})", m.id, m.category, m.posted, m.saved)
    })
}
