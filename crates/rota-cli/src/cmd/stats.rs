//! `rota stats`: per-category posting counts. The default command.

use std::io::{self, Write};

use anyhow::{Context as _, Result};
use clap::Args;
use rota_core::repository::StateRepository;
use rota_core::selector::{Stats, stats};

use super::Context;
use crate::output::{pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug, Default)]
pub struct StatsArgs {}

/// Execute `rota stats`.
pub fn run_stats(_args: &StatsArgs, ctx: &Context) -> Result<()> {
    let repo = StateRepository::from_config(&ctx.config);
    let snapshot = repo.load().context("failed to load state")?;
    let payload = stats(&snapshot, &ctx.config.categories);

    render_mode(ctx.output, &payload, write_text, write_pretty)
}

fn write_text(stats: &Stats, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "category\tposted\tcycles\tlast")?;
    for c in &stats.categories {
        let last = c.last_posted.as_ref().map_or("-", |lp| lp.id.as_str());
        writeln!(w, "{}\t{}\t{}\t{}", c.category, c.posted, c.cycles, last)?;
    }
    Ok(())
}

fn write_pretty(stats: &Stats, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Posting state")?;
    for c in &stats.categories {
        writeln!(w, "{:<14} {:>5} posted  cycle {}", c.category, c.posted, c.cycles)?;
        if let Some(lp) = &c.last_posted {
            writeln!(w, "{:<14} last: {} at {}", "", lp.id, lp.timestamp)?;
        }
    }
    writeln!(w)?;
    let updated = if stats.last_updated.is_empty() {
        "never"
    } else {
        stats.last_updated.as_str()
    };
    pretty_kv(w, "updated", updated)
}
