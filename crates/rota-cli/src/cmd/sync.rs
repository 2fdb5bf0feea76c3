//! `rota sync`: reconcile the local state file with the remote document.

use std::io::{self, Write};

use anyhow::Result;
use clap::{ArgGroup, Args};
use rota_core::compare::{ComparisonResult, MergeSummary};
use rota_core::repository::StateRepository;
use rota_core::sync::{SyncMode, SyncOptions, SyncOrchestrator, SyncOutcome, SyncStatus};

use super::Context;
use crate::output::{CliError, pretty_kv, pretty_section, render_error, render_mode};

#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("direction")
        .required(true)
        .args(["from_remote", "to_remote", "auto", "status"])
))]
pub struct SyncArgs {
    /// Copy the remote document over the local file.
    #[arg(long)]
    pub from_remote: bool,

    /// Copy the local file over the remote document.
    #[arg(long)]
    pub to_remote: bool,

    /// Merge both sides and write the result to both.
    #[arg(long)]
    pub auto: bool,

    /// Compare both sides without writing.
    #[arg(long)]
    pub status: bool,

    /// Overwrite even when the destination is newer or the sides conflict.
    #[arg(long)]
    pub force: bool,

    /// Report what would happen without writing anything.
    #[arg(long)]
    pub dry_run: bool,
}

impl SyncArgs {
    pub const fn mode(&self) -> SyncMode {
        if self.from_remote {
            SyncMode::Pull
        } else if self.to_remote {
            SyncMode::Push
        } else if self.auto {
            SyncMode::Auto
        } else {
            SyncMode::Status
        }
    }

    const fn options(&self) -> SyncOptions {
        SyncOptions {
            force: self.force,
            dry_run: self.dry_run,
        }
    }
}

/// Execute `rota sync`.
pub fn run_sync(args: &SyncArgs, ctx: &Context) -> Result<()> {
    let repo = StateRepository::from_config(&ctx.config);
    let orchestrator = SyncOrchestrator::new(&repo);

    let outcome = match orchestrator.run(args.mode(), args.options()) {
        Ok(outcome) => outcome,
        Err(err) => {
            render_error(ctx.output, &CliError::coded(err.code(), err.to_string()))?;
            anyhow::bail!("sync {} failed", args.mode().as_str());
        }
    };

    let verbose = ctx.verbose;
    render_mode(
        ctx.output,
        &outcome,
        |o, w| write_text(o, w),
        |o, w| write_pretty(o, verbose, w),
    )?;

    if !outcome.action.is_complete() {
        anyhow::bail!("sync {}: {}", args.mode().as_str(), outcome.action.describe());
    }
    Ok(())
}

fn write_text(outcome: &SyncOutcome, w: &mut dyn Write) -> io::Result<()> {
    if let Some(status) = &outcome.status {
        return write_status_text(status, w);
    }
    let prefix = if outcome.dry_run { "dry-run " } else { "" };
    writeln!(w, "{prefix}{}: {}", outcome.mode.as_str(), outcome.action.describe())?;
    if let Some(backup) = &outcome.backup {
        writeln!(w, "backup: {}", backup.display())?;
    }
    for warning in &outcome.warnings {
        writeln!(w, "warning: {warning}")?;
    }
    Ok(())
}

fn write_status_text(status: &SyncStatus, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "local: {}", presence(status.local_present, status.local_timestamp.as_deref()))?;
    writeln!(w, "remote: {}", remote_presence(status))?;
    let verdict = match &status.comparison {
        Some(c) if c.is_identical => "in sync",
        Some(c) if c.has_conflict => "conflict",
        Some(_) => "differs",
        None => "incomplete",
    };
    writeln!(w, "status: {verdict}")
}

fn write_pretty(outcome: &SyncOutcome, verbose: bool, w: &mut dyn Write) -> io::Result<()> {
    if let Some(status) = &outcome.status {
        pretty_section(w, "Sync status")?;
        pretty_kv(w, "local", presence(status.local_present, status.local_timestamp.as_deref()))?;
        pretty_kv(w, "remote", remote_presence(status))?;
        match &status.comparison {
            Some(comparison) => write_comparison(comparison, verbose, w)?,
            None => writeln!(w, "\nOne side is missing; nothing to compare.")?,
        }
        return Ok(());
    }

    pretty_section(w, &format!("Sync ({})", outcome.mode.as_str()))?;
    if outcome.dry_run {
        pretty_kv(w, "would", outcome.action.describe())?;
    } else {
        pretty_kv(w, "result", outcome.action.describe())?;
    }
    if let Some(backup) = &outcome.backup {
        pretty_kv(w, "backup", backup.display().to_string())?;
    }
    if let Some(comparison) = &outcome.comparison
        && !comparison.is_identical
    {
        write_comparison(comparison, verbose, w)?;
    }
    if let Some(merge) = &outcome.merge {
        write_merge(merge, w)?;
    }
    for warning in &outcome.warnings {
        writeln!(w, "warning: {warning}")?;
    }
    Ok(())
}

fn write_comparison(comparison: &ComparisonResult, verbose: bool, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w)?;
    if comparison.is_identical {
        return writeln!(w, "Both sides are identical.");
    }
    if comparison.has_conflict {
        writeln!(w, "Conflict: both sides posted items the other has not seen.")?;
    }
    if let Some(diff) = &comparison.timestamp_diff {
        pretty_kv(w, "timestamps", diff)?;
    }
    for (category, diff) in &comparison.posted_diff {
        writeln!(
            w,
            "  {category}: {} only in A, {} only in B",
            diff.only_in_a.len(),
            diff.only_in_b.len()
        )?;
        if verbose {
            for id in &diff.only_in_a {
                writeln!(w, "    A + {id}")?;
            }
            for id in &diff.only_in_b {
                writeln!(w, "    B + {id}")?;
            }
        }
    }
    for (category, diff) in &comparison.cycle_diff {
        writeln!(w, "  {category}: cycle {} vs {}", diff.a, diff.b)?;
    }
    Ok(())
}

fn write_merge(merge: &MergeSummary, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "\nMerged (A = remote, B = local):")?;
    for category in &merge.categories {
        writeln!(
            w,
            "  {:<14} {:>4} + {:>4} -> {:>4}  (cycle {})",
            category.category, category.a, category.b, category.merged, category.cycle_count
        )?;
    }
    pretty_kv(w, "updated", &merge.last_updated)
}

fn presence(present: bool, timestamp: Option<&str>) -> String {
    match (present, timestamp) {
        (true, Some(ts)) if !ts.is_empty() => format!("present (updated {ts})"),
        (true, _) => "present".to_string(),
        (false, _) => "missing".to_string(),
    }
}

fn remote_presence(status: &SyncStatus) -> String {
    if !status.remote_configured {
        return "not configured".to_string();
    }
    let state = status.remote_error.as_ref().map_or_else(
        || presence(status.remote_present, status.remote_timestamp.as_deref()),
        |err| format!("unreadable ({err})"),
    );
    match &status.remote_label {
        Some(label) => format!("{label}: {state}"),
        None => state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rota_core::sync::SyncAction;

    fn args(flag: &str) -> SyncArgs {
        SyncArgs {
            from_remote: flag == "pull",
            to_remote: flag == "push",
            auto: flag == "auto",
            status: flag == "status",
            force: false,
            dry_run: false,
        }
    }

    #[test]
    fn flags_select_mode() {
        assert_eq!(args("pull").mode(), SyncMode::Pull);
        assert_eq!(args("push").mode(), SyncMode::Push);
        assert_eq!(args("auto").mode(), SyncMode::Auto);
        assert_eq!(args("status").mode(), SyncMode::Status);
    }

    #[test]
    fn status_text_reports_missing_remote() {
        let status = SyncStatus {
            local_present: true,
            local_timestamp: Some("2025-01-01T00:00:00Z".into()),
            ..SyncStatus::default()
        };
        let mut buf = Vec::new();
        write_status_text(&status, &mut buf).expect("write");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.contains("local: present (updated 2025-01-01T00:00:00Z)"));
        assert!(text.contains("remote: not configured"));
        assert!(text.contains("status: incomplete"));
    }

    #[test]
    fn status_text_names_the_remote_document() {
        let status = SyncStatus {
            remote_configured: true,
            remote_label: Some("gist abc123".into()),
            remote_error: Some("network error: down".into()),
            ..SyncStatus::default()
        };
        let mut buf = Vec::new();
        write_status_text(&status, &mut buf).expect("write");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.contains("remote: gist abc123: unreadable (network error: down)"));
        assert!(text.contains("local: missing"));
    }

    #[test]
    fn dry_run_text_is_prefixed() {
        let outcome = SyncOutcome {
            mode: SyncMode::Auto,
            action: SyncAction::Merged,
            dry_run: true,
            comparison: None,
            merge: None,
            backup: None,
            status: None,
            warnings: vec!["remote slow".into()],
        };
        let mut buf = Vec::new();
        write_text(&outcome, &mut buf).expect("write");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.starts_with("dry-run auto: merged into local and remote"));
        assert!(text.contains("warning: remote slow"));
    }
}
