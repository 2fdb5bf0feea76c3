//! `rota pick`: choose the next item to post from a category.

use std::io::Write;

use anyhow::{Context as _, Result};
use clap::Args;
use rota_core::catalog::{CatalogDir, CatalogSource};
use rota_core::repository::{SaveOutcome, StateRepository};
use rota_core::selector::{available_items, mark_as_posted, random_available_item};
use serde::Serialize;
use serde_json::{Map, Value};

use super::Context;
use crate::output::{CliError, pretty_kv, render, render_error};

#[derive(Args, Debug)]
pub struct PickArgs {
    /// Category to pick from (plural or singular name).
    pub category: String,

    /// Record the pick as posted and save.
    #[arg(long)]
    pub mark: bool,
}

#[derive(Debug, Serialize)]
struct Picked {
    category: String,
    id: String,
    label: String,
    fields: Map<String, Value>,
    available: usize,
    cycle_count: i64,
    saved: Option<String>,
}

/// Execute `rota pick`.
pub fn run_pick(args: &PickArgs, ctx: &Context) -> Result<()> {
    let category = ctx.category(&args.category)?;
    let catalog = match CatalogDir::from_config(&ctx.config).catalog(category) {
        Ok(catalog) => catalog,
        Err(err) => {
            render_error(ctx.output, &CliError::coded(err.code(), err.to_string()))?;
            anyhow::bail!("catalog for {} unreadable", category.plural);
        }
    };

    let repo = StateRepository::from_config(&ctx.config);
    let mut snapshot = repo.load().context("failed to load state")?;

    let available = available_items(&mut snapshot, category, &catalog).len();
    let Some(item) = random_available_item(&mut snapshot, category, &catalog, &mut rand::thread_rng())
    else {
        render_error(
            ctx.output,
            &CliError::new(format!("catalog for {} is empty", category.plural)),
        )?;
        anyhow::bail!("nothing to pick");
    };
    let item = item.clone();

    let saved = if args.mark {
        let outcome = mark_as_posted(&repo, &mut snapshot, category, &item.id);
        if let SaveOutcome::Unsaved { reason } = &outcome {
            anyhow::bail!("picked {} but could not save: {reason}", item.id);
        }
        Some(outcome.to_string())
    } else {
        None
    };

    let payload = Picked {
        category: category.plural.clone(),
        label: item.label().to_string(),
        id: item.id,
        fields: item.fields,
        available,
        cycle_count: snapshot.category(&category.plural).map_or(0, |s| s.cycle_count),
        saved,
    };

    render(ctx.output, &payload, |p, w: &mut dyn Write| {
        pretty_kv(w, "picked", format!("{} ({})", p.label, p.id))?;
        pretty_kv(w, "available", format!("{} in cycle {}", p.available, p.cycle_count))?;
        if let Some(saved) = &p.saved {
            pretty_kv(w, "state", saved)?;
        }
        Ok(())
    })
}
