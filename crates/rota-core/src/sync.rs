//! Sync between the local state file and the remote document.
//!
//! # Flows
//!
//! - **pull**: remote → local. Fails when the remote is absent.
//! - **push**: local → remote. Fails when the local file is absent.
//! - **auto**: copies whichever side exists to the other; with both present,
//!   merges and writes the merge to both.
//! - **status**: reads both sides, compares, writes nothing.
//!
//! With both sides present and different, pull and push refuse to overwrite
//! a destination that is strictly newer than the source, then refuse when the
//! sides conflict. `force` skips both guards. Auto never refuses; it merges.
//!
//! `dry_run` walks the same decisions and reports the intended action
//! without backing up or writing anything.

use std::cmp::Ordering;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::compare::{ComparisonResult, MergeSummary, compare, merge};
use crate::error::ErrorCode;
use crate::repository::{RepositoryError, StateRepository};
use crate::snapshot::{Snapshot, compare_timestamps};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Pull,
    Push,
    Auto,
    Status,
}

impl SyncMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Push => "push",
            Self::Auto => "auto",
            Self::Status => "status",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    pub force: bool,
    pub dry_run: bool,
}

/// What a sync did, or would do under `dry_run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    AlreadyInSync,
    CopiedRemoteToLocal,
    CopiedLocalToRemote,
    /// Merge written to both sides.
    Merged,
    /// Merge written locally; the remote write failed.
    MergedLocalOnly,
    /// Status only.
    Reported,
}

impl SyncAction {
    /// Whether every intended write landed.
    #[must_use]
    pub const fn is_complete(self) -> bool {
        !matches!(self, Self::MergedLocalOnly)
    }

    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::AlreadyInSync => "already in sync",
            Self::CopiedRemoteToLocal => "remote copied to local",
            Self::CopiedLocalToRemote => "local copied to remote",
            Self::Merged => "merged into local and remote",
            Self::MergedLocalOnly => "merged into local; remote not updated",
            Self::Reported => "status reported",
        }
    }
}

/// Presence and freshness of both sides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub remote_configured: bool,
    /// Which remote document was consulted, e.g. `gist abc123`.
    pub remote_label: Option<String>,
    pub remote_present: bool,
    pub local_present: bool,
    pub remote_timestamp: Option<String>,
    pub local_timestamp: Option<String>,
    /// Remote compared as `a`, local as `b`.
    pub comparison: Option<ComparisonResult>,
    /// Why the remote could not be read, when it could not.
    pub remote_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub mode: SyncMode,
    pub action: SyncAction,
    pub dry_run: bool,
    pub comparison: Option<ComparisonResult>,
    pub merge: Option<MergeSummary>,
    pub backup: Option<PathBuf>,
    pub status: Option<SyncStatus>,
    pub warnings: Vec<String>,
}

impl SyncOutcome {
    fn new(mode: SyncMode, action: SyncAction, options: SyncOptions) -> Self {
        Self {
            mode,
            action,
            dry_run: options.dry_run,
            comparison: None,
            merge: None,
            backup: None,
            status: None,
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Local,
    Remote,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Remote => "remote",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("no state found on either side")]
    BothMissing,

    #[error("{0} state not found")]
    SnapshotMissing(Side),

    #[error("{destination} state ({destination_ts}) is newer than {source_side} state ({source_ts}); use --force to overwrite")]
    StaleOverwrite {
        source_side: Side,
        destination: Side,
        source_ts: String,
        destination_ts: String,
    },

    #[error("local and remote diverged in {}; use --auto to merge or --force to overwrite", .categories.join(", "))]
    Conflict { categories: Vec<String> },

    #[error("remote store not configured")]
    RemoteNotConfigured,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl SyncError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::BothMissing | Self::SnapshotMissing(_) => ErrorCode::SnapshotMissing,
            Self::StaleOverwrite { .. } => ErrorCode::StaleOverwrite,
            Self::Conflict { .. } => ErrorCode::SyncConflict,
            Self::RemoteNotConfigured => ErrorCode::RemoteNotConfigured,
            Self::Repository(err) => err.code(),
        }
    }
}

/// Sequences the sync flows over one repository.
#[derive(Debug)]
pub struct SyncOrchestrator<'a> {
    repo: &'a StateRepository,
}

impl<'a> SyncOrchestrator<'a> {
    #[must_use]
    pub const fn new(repo: &'a StateRepository) -> Self {
        Self { repo }
    }

    /// Run one flow.
    ///
    /// # Errors
    ///
    /// [`SyncError`] when a guard trips, a required side is absent, no
    /// remote is configured for a flow that needs one, or a side cannot be
    /// read or written.
    pub fn run(&self, mode: SyncMode, options: SyncOptions) -> Result<SyncOutcome, SyncError> {
        debug!(mode = mode.as_str(), force = options.force, dry_run = options.dry_run, "sync");
        match mode {
            SyncMode::Status => {
                let status = self.status()?;
                let mut outcome = SyncOutcome::new(mode, SyncAction::Reported, options);
                outcome.comparison.clone_from(&status.comparison);
                if let Some(err) = &status.remote_error {
                    outcome.warnings.push(format!("remote unreadable: {err}"));
                }
                outcome.status = Some(status);
                Ok(outcome)
            }
            SyncMode::Pull | SyncMode::Push | SyncMode::Auto => {
                if !self.repo.has_remote() {
                    return Err(SyncError::RemoteNotConfigured);
                }
                let local = self.repo.local_snapshot()?;
                let remote = self.repo.remote_snapshot()?;
                match mode {
                    SyncMode::Pull => self.pull(remote, local, options),
                    SyncMode::Push => self.push(local, remote, options),
                    _ => self.auto(remote, local, options),
                }
            }
        }
    }

    /// Presence, timestamps and comparison of both sides. Never writes.
    ///
    /// # Errors
    ///
    /// Only when the local file exists but cannot be read or decoded. An
    /// unreadable remote is reported in [`SyncStatus::remote_error`].
    pub fn status(&self) -> Result<SyncStatus, SyncError> {
        let local = self.repo.local_snapshot()?;
        let (remote, remote_error) = match self.repo.remote_snapshot() {
            Ok(remote) => (remote, None),
            Err(err) => {
                warn!(error = %err, "remote state unreadable");
                (None, Some(err.to_string()))
            }
        };

        let comparison = match (&remote, &local) {
            (Some(r), Some(l)) => Some(compare(r, l)),
            _ => None,
        };

        Ok(SyncStatus {
            remote_configured: self.repo.has_remote(),
            remote_label: self.repo.remote_label(),
            remote_present: remote.is_some(),
            local_present: local.is_some(),
            remote_timestamp: remote.map(|s| s.last_updated),
            local_timestamp: local.map(|s| s.last_updated),
            comparison,
            remote_error,
        })
    }

    fn pull(
        &self,
        remote: Option<Snapshot>,
        local: Option<Snapshot>,
        options: SyncOptions,
    ) -> Result<SyncOutcome, SyncError> {
        let remote = remote.ok_or(SyncError::SnapshotMissing(Side::Remote))?;
        let mut outcome = SyncOutcome::new(SyncMode::Pull, SyncAction::CopiedRemoteToLocal, options);

        if let Some(local) = &local {
            let comparison = compare(&remote, local);
            if comparison.is_identical {
                outcome.action = SyncAction::AlreadyInSync;
                outcome.comparison = Some(comparison);
                return Ok(outcome);
            }
            guard(Side::Remote, &remote, Side::Local, local, &comparison, options)?;
            outcome.comparison = Some(comparison);
        }

        if !options.dry_run {
            outcome.backup = self.repo.backup_local()?;
            self.repo.write_local(&remote)?;
            info!("remote state copied to local");
        }
        Ok(outcome)
    }

    fn push(
        &self,
        local: Option<Snapshot>,
        remote: Option<Snapshot>,
        options: SyncOptions,
    ) -> Result<SyncOutcome, SyncError> {
        let local = local.ok_or(SyncError::SnapshotMissing(Side::Local))?;
        let mut outcome = SyncOutcome::new(SyncMode::Push, SyncAction::CopiedLocalToRemote, options);

        if let Some(remote) = &remote {
            let comparison = compare(&local, remote);
            if comparison.is_identical {
                outcome.action = SyncAction::AlreadyInSync;
                outcome.comparison = Some(comparison);
                return Ok(outcome);
            }
            guard(Side::Local, &local, Side::Remote, remote, &comparison, options)?;
            outcome.comparison = Some(comparison);
        }

        if !options.dry_run {
            self.repo.write_remote(&local)?;
            info!("local state copied to remote");
        }
        Ok(outcome)
    }

    fn auto(
        &self,
        remote: Option<Snapshot>,
        local: Option<Snapshot>,
        options: SyncOptions,
    ) -> Result<SyncOutcome, SyncError> {
        // Auto never refuses on conflict, and a one-sided copy has nothing to
        // guard against.
        let unguarded = SyncOptions {
            force: true,
            ..options
        };

        let (remote, local) = match (remote, local) {
            (None, None) => return Err(SyncError::BothMissing),
            (Some(remote), None) => {
                info!("local state missing; pulling remote");
                return self.pull(Some(remote), None, unguarded).map(as_auto);
            }
            (None, Some(local)) => {
                info!("remote state missing; pushing local");
                return self.push(Some(local), None, unguarded).map(as_auto);
            }
            (Some(remote), Some(local)) => (remote, local),
        };

        let comparison = compare(&remote, &local);
        let mut outcome = SyncOutcome::new(SyncMode::Auto, SyncAction::Merged, options);
        if comparison.is_identical {
            outcome.action = SyncAction::AlreadyInSync;
            outcome.comparison = Some(comparison);
            return Ok(outcome);
        }
        if comparison.has_conflict {
            info!(
                categories = ?comparison.conflicting_categories(),
                "conflict detected; merging"
            );
        }

        let merged = merge(&remote, &local);
        outcome.merge = Some(MergeSummary::between(&remote, &local, &merged));
        outcome.comparison = Some(comparison);

        if options.dry_run {
            return Ok(outcome);
        }

        outcome.backup = self.repo.backup_local()?;
        self.repo.write_local(&merged)?;

        if let Err(err) = self.repo.write_remote(&merged) {
            warn!(error = %err, "merged state written locally but not to remote");
            outcome.action = SyncAction::MergedLocalOnly;
            outcome.warnings.push(format!("remote not updated: {err}"));
        }
        Ok(outcome)
    }
}

fn as_auto(mut outcome: SyncOutcome) -> SyncOutcome {
    outcome.mode = SyncMode::Auto;
    outcome
}

/// Stale-overwrite guard, then conflict guard. Both yield to `force`.
fn guard(
    source_side: Side,
    source: &Snapshot,
    destination: Side,
    dest: &Snapshot,
    comparison: &ComparisonResult,
    options: SyncOptions,
) -> Result<(), SyncError> {
    if options.force {
        return Ok(());
    }
    if compare_timestamps(&dest.last_updated, &source.last_updated) == Ordering::Greater {
        return Err(SyncError::StaleOverwrite {
            source_side,
            destination,
            source_ts: source.last_updated.clone(),
            destination_ts: dest.last_updated.clone(),
        });
    }
    if comparison.has_conflict {
        return Err(SyncError::Conflict {
            categories: comparison
                .conflicting_categories()
                .into_iter()
                .map(str::to_string)
                .collect(),
        });
    }
    Ok(())
}
