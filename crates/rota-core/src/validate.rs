//! State validation.
//!
//! Six independent checks over one state document. A check either passes,
//! passes with warnings, or fails; the document is valid when nothing fails.
//! Validation never returns an error: unreadable inputs become findings.
//!
//! | check          | fails on                                                   |
//! |----------------|------------------------------------------------------------|
//! | `structure`    | missing required fields, wrong JSON kinds                  |
//! | `id_existence` | posted ids absent from the catalog, unreadable catalogs    |
//! | `cycle_counts` | counts outside `0..=max_cycle_count`                       |
//! | `timestamps`   | unparseable or future instants, last-posted after update   |
//! | `consistency`  | more posted than catalog items, last-posted id not posted  |
//! | `sync_status`  | never fails; divergence and missing sides are warnings     |

use std::collections::BTreeSet;
use std::fmt::Write as _;

use chrono::{DateTime, Duration, Months, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::catalog::CatalogSource;
use crate::category::Category;
use crate::compare::compare;
use crate::config::ValidationConfig;
use crate::repository::{SaveOutcome, StateRepository};
use crate::schema::{CYCLE_COUNT_KEY, LAST_UPDATED_KEY};
use crate::snapshot::{Snapshot, format_timestamp, parse_timestamp};

/// Orphan ids listed per category before the rest are summarized.
const ORPHAN_PREVIEW: usize = 5;

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Structure,
    IdExistence,
    CycleCounts,
    Timestamps,
    Consistency,
    SyncStatus,
}

impl CheckKind {
    pub const ALL: [Self; 6] = [
        Self::Structure,
        Self::IdExistence,
        Self::CycleCounts,
        Self::Timestamps,
        Self::Consistency,
        Self::SyncStatus,
    ];

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Structure => "structure",
            Self::IdExistence => "id_existence",
            Self::CycleCounts => "cycle_counts",
            Self::Timestamps => "timestamps",
            Self::Consistency => "consistency",
            Self::SyncStatus => "sync_status",
        }
    }

    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Structure => "Document structure",
            Self::IdExistence => "ID existence",
            Self::CycleCounts => "Cycle counts",
            Self::Timestamps => "Timestamps",
            Self::Consistency => "Logical consistency",
            Self::SyncStatus => "Sync status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub check: CheckKind,
    pub passed: bool,
    /// Passed, but with warnings.
    pub warning: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

impl CheckResult {
    fn new(check: CheckKind, issues: Vec<String>, warnings: Vec<String>) -> Self {
        let passed = issues.is_empty();
        Self {
            check,
            passed,
            warning: passed && !warnings.is_empty(),
            issues,
            warnings,
        }
    }

    fn not_run(check: CheckKind, reason: &str) -> Self {
        Self::new(check, vec![format!("not run: {reason}")], Vec::new())
    }

    #[must_use]
    pub const fn status_label(&self) -> &'static str {
        if !self.passed {
            "FAIL"
        } else if self.warning {
            "WARN"
        } else {
            "OK"
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub generated_at: String,
    /// Which copy was validated (`remote`, `local`, `fresh`).
    pub source: String,
    pub checks: Vec<CheckResult>,
    pub summary: Summary,
    /// Orphan ids removed by `--fix`.
    pub fixed: usize,
    /// Where the fixed state was saved, when a fix was applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved: Option<String>,
}

impl ValidationReport {
    fn from_checks(checks: Vec<CheckResult>, now: DateTime<Utc>, source: &str, fixed: usize) -> Self {
        let mut summary = Summary {
            total: checks.len(),
            ..Summary::default()
        };
        for check in &checks {
            if !check.passed {
                summary.failed += 1;
            } else if check.warning {
                summary.warnings += 1;
            } else {
                summary.passed += 1;
            }
        }
        Self {
            valid: summary.failed == 0,
            generated_at: format_timestamp(now),
            source: source.to_string(),
            checks,
            summary,
            fixed,
            saved: None,
        }
    }

    #[must_use]
    pub fn check(&self, kind: CheckKind) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.check == kind)
    }

    /// Terminal rendering: one status line per check, findings indented.
    #[must_use]
    pub fn to_text(&self, verbose: bool) -> String {
        let mut out = String::new();
        for check in &self.checks {
            let _ = writeln!(out, "{:<4} {}", check.status_label(), check.check.title());
            if verbose || !check.passed || check.warning {
                for issue in &check.issues {
                    let _ = writeln!(out, "       - {issue}");
                }
                for warning in &check.warnings {
                    let _ = writeln!(out, "       ! {warning}");
                }
            }
        }
        let s = &self.summary;
        let _ = write!(out, "\n{}/{} checks passed", s.passed, s.total);
        if s.failed > 0 {
            let _ = write!(out, ", {} failed", s.failed);
        }
        if s.warnings > 0 {
            let _ = write!(out, ", {} with warnings", s.warnings);
        }
        let _ = writeln!(out);
        if self.fixed > 0 {
            let _ = writeln!(out, "removed {} orphaned id(s)", self.fixed);
        }
        let _ = writeln!(out, "{}", if self.valid { "state is valid" } else { "state is INVALID" });
        out
    }

    /// Markdown rendering for `--report-file`.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let s = &self.summary;
        let mut out = String::new();
        let _ = writeln!(out, "# State validation report\n");
        let _ = writeln!(out, "**Generated:** {}  ", self.generated_at);
        let _ = writeln!(out, "**Source:** {}\n", self.source);
        let _ = writeln!(out, "## Summary\n");
        let _ = writeln!(out, "- **Checks:** {}", s.total);
        let _ = writeln!(out, "- **Passed:** {}", s.passed);
        let _ = writeln!(out, "- **Failed:** {}", s.failed);
        let _ = writeln!(out, "- **Warnings:** {}", s.warnings);
        if self.fixed > 0 {
            let _ = writeln!(out, "- **Orphans removed:** {}", self.fixed);
        }
        let _ = writeln!(out, "- **Result:** {}\n", if self.valid { "valid" } else { "invalid" });
        let _ = writeln!(out, "## Details\n");

        for check in &self.checks {
            let _ = writeln!(out, "### {} {}\n", check.status_label(), check.check.title());
            if !check.issues.is_empty() {
                let _ = writeln!(out, "**Issues:**\n");
                for issue in &check.issues {
                    let _ = writeln!(out, "- {issue}");
                }
                let _ = writeln!(out);
            }
            if !check.warnings.is_empty() {
                let _ = writeln!(out, "**Warnings:**\n");
                for warning in &check.warnings {
                    let _ = writeln!(out, "- {warning}");
                }
                let _ = writeln!(out);
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Both copies as seen by the sync-status check.
#[derive(Debug, Clone, Default)]
pub struct SyncSides {
    pub local: Option<Snapshot>,
    pub remote: Option<Snapshot>,
    /// Why the remote copy is absent, when known.
    pub remote_note: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ValidateOptions {
    /// Remove orphaned ids from the snapshot.
    pub fix: bool,
    /// Restrict id, cycle and consistency checks to one category (plural).
    pub category: Option<String>,
    pub now: DateTime<Utc>,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            fix: false,
            category: None,
            now: Utc::now(),
        }
    }
}

/// Result of [`Validator::run`]: the report plus the repaired snapshot when
/// `fix` removed anything.
#[derive(Debug, Clone)]
pub struct Validation {
    pub report: ValidationReport,
    pub fixed_snapshot: Option<Snapshot>,
}

pub struct Validator<'a> {
    config: &'a ValidationConfig,
    categories: &'a [Category],
    catalogs: &'a dyn CatalogSource,
}

impl<'a> Validator<'a> {
    pub fn new(
        config: &'a ValidationConfig,
        categories: &'a [Category],
        catalogs: &'a dyn CatalogSource,
    ) -> Self {
        Self {
            config,
            categories,
            catalogs,
        }
    }

    /// Validate one raw state document.
    #[must_use]
    pub fn run(
        &self,
        document: &Value,
        source: &str,
        sync: &SyncSides,
        options: &ValidateOptions,
    ) -> Validation {
        let structure = self.check_structure(document);

        let mut snapshot = match Snapshot::from_document(document.clone(), self.categories) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let reason = format!("state document could not be decoded ({err})");
                let mut checks = vec![structure];
                checks.extend(
                    CheckKind::ALL[1..5]
                        .iter()
                        .map(|kind| CheckResult::not_run(*kind, &reason)),
                );
                checks.push(check_sync_status(sync));
                return Validation {
                    report: ValidationReport::from_checks(checks, options.now, source, 0),
                    fixed_snapshot: None,
                };
            }
        };

        let selected = self.selected(options.category.as_deref());
        let (ids, fixed) = self.check_ids(&mut snapshot, &selected, options.fix);
        let checks = vec![
            structure,
            ids,
            self.check_cycle_counts(&snapshot, &selected),
            self.check_timestamps(&snapshot, options.now),
            self.check_consistency(&snapshot, &selected),
            check_sync_status(sync),
        ];

        Validation {
            report: ValidationReport::from_checks(checks, options.now, source, fixed),
            fixed_snapshot: (fixed > 0).then_some(snapshot),
        }
    }

    fn selected(&self, filter: Option<&str>) -> Vec<&'a Category> {
        self.categories
            .iter()
            .filter(|c| filter.is_none_or(|f| c.plural == f || c.singular == f))
            .collect()
    }

    fn is_legacy_optional(&self, category: &Category) -> bool {
        self.config.legacy_optional.contains(&category.plural)
    }

    // -- structure ---------------------------------------------------------

    fn check_structure(&self, document: &Value) -> CheckResult {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        let Value::Object(raw) = document else {
            issues.push("state document is not a JSON object".to_string());
            return CheckResult::new(CheckKind::Structure, issues, warnings);
        };

        let mut known: BTreeSet<String> =
            [CYCLE_COUNT_KEY, LAST_UPDATED_KEY].into_iter().map(str::to_string).collect();

        let mut missing = |field: &str, category: &Category, issues: &mut Vec<String>| {
            if self.is_legacy_optional(category) {
                warnings.push(format!("field '{field}' is missing (written before '{}' existed)", category.plural));
            } else {
                issues.push(format!("required field '{field}' is missing"));
            }
        };

        for category in self.categories {
            let posted = category.posted_key();
            let last = category.last_posted_key();

            match raw.get(&posted) {
                None => missing(&posted, category, &mut issues),
                Some(Value::Array(items)) if items.iter().all(Value::is_string) => {}
                Some(_) => issues.push(format!("field '{posted}' must be an array of strings")),
            }

            match raw.get(&last) {
                None => missing(&last, category, &mut issues),
                Some(Value::Null) => {}
                Some(Value::Object(obj)) => {
                    if !obj.contains_key("id") || !obj.contains_key("timestamp") {
                        issues.push(format!("field '{last}' needs both 'id' and 'timestamp'"));
                    } else if !obj["id"].is_string() {
                        issues.push(format!("field '{last}.id' must be a string"));
                    }
                }
                Some(_) => issues.push(format!("field '{last}' must be an object or null")),
            }

            known.insert(posted);
            known.insert(last);
        }

        match raw.get(LAST_UPDATED_KEY) {
            None => issues.push(format!("required field '{LAST_UPDATED_KEY}' is missing")),
            Some(Value::String(_)) => {}
            Some(_) => issues.push(format!("field '{LAST_UPDATED_KEY}' must be a string")),
        }

        match raw.get(CYCLE_COUNT_KEY) {
            None => issues.push(format!("required field '{CYCLE_COUNT_KEY}' is missing")),
            Some(Value::Object(counts)) => {
                for category in self.categories {
                    match counts.get(&category.plural) {
                        None => missing(
                            &format!("{CYCLE_COUNT_KEY}.{}", category.plural),
                            category,
                            &mut issues,
                        ),
                        Some(Value::Number(_)) => {}
                        Some(_) => issues.push(format!(
                            "field '{CYCLE_COUNT_KEY}.{}' must be a number",
                            category.plural
                        )),
                    }
                }
            }
            Some(_) => issues.push(format!("field '{CYCLE_COUNT_KEY}' must be an object")),
        }

        for key in unknown_keys(raw, &known) {
            warnings.push(format!("unknown field '{key}' (kept as is)"));
        }

        CheckResult::new(CheckKind::Structure, issues, warnings)
    }

    // -- id existence ------------------------------------------------------

    fn check_ids(
        &self,
        snapshot: &mut Snapshot,
        selected: &[&Category],
        fix: bool,
    ) -> (CheckResult, usize) {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();
        let mut fixed = 0;

        for category in selected {
            let catalog = match self.catalogs.catalog(category) {
                Ok(catalog) => catalog,
                Err(err) => {
                    issues.push(format!("{}: catalog unavailable: {err}", category.plural));
                    continue;
                }
            };

            let state = snapshot.category_mut(category);
            let orphans: Vec<String> = state
                .posted
                .iter()
                .filter(|id| !catalog.contains(id))
                .cloned()
                .collect();
            if orphans.is_empty() {
                continue;
            }

            if fix {
                for id in &orphans {
                    state.posted.remove(id);
                }
                // The last-posted id must stay inside the posted set.
                if state
                    .last_posted
                    .as_ref()
                    .is_some_and(|last| orphans.contains(&last.id))
                {
                    state.last_posted = None;
                    warnings.push(format!(
                        "{}: cleared last posted item (it was orphaned)",
                        category.plural
                    ));
                }
                fixed += orphans.len();
                warnings.push(format!(
                    "{}: removed {} orphaned id(s): {}",
                    category.plural,
                    orphans.len(),
                    preview(&orphans)
                ));
            } else {
                issues.push(format!(
                    "{}: {} orphaned id(s) not in catalog: {}",
                    category.plural,
                    orphans.len(),
                    preview(&orphans)
                ));
            }
        }

        (CheckResult::new(CheckKind::IdExistence, issues, warnings), fixed)
    }

    // -- cycle counts ------------------------------------------------------

    fn check_cycle_counts(&self, snapshot: &Snapshot, selected: &[&Category]) -> CheckResult {
        let max = self.config.max_cycle_count;
        let issues = selected
            .iter()
            .filter_map(|category| {
                let count = snapshot.category(&category.plural)?.cycle_count;
                if count < 0 {
                    Some(format!("{}: cycle count is negative ({count})", category.plural))
                } else if count > max {
                    Some(format!(
                        "{}: cycle count {count} exceeds the maximum of {max}",
                        category.plural
                    ))
                } else {
                    None
                }
            })
            .collect();
        CheckResult::new(CheckKind::CycleCounts, issues, Vec::new())
    }

    // -- timestamps --------------------------------------------------------

    fn check_timestamps(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> CheckResult {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        let tolerance = self.config.future_tolerance_minutes;
        let future_limit = match Duration::try_minutes(tolerance)
            .and_then(|d| now.checked_add_signed(d))
        {
            Some(limit) => limit,
            None => {
                issues.push(format!(
                    "future tolerance of {tolerance} minute(s) is out of range; future timestamps not checked"
                ));
                DateTime::<Utc>::MAX_UTC
            }
        };
        let past_limit = now
            .checked_sub_months(Months::new(self.config.past_tolerance_years.saturating_mul(12)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let last_updated = if snapshot.last_updated.is_empty() {
            issues.push(format!("{LAST_UPDATED_KEY} is missing"));
            None
        } else {
            match parse_timestamp(&snapshot.last_updated) {
                None => {
                    issues.push(format!(
                        "{LAST_UPDATED_KEY} is not a valid timestamp: {}",
                        snapshot.last_updated
                    ));
                    None
                }
                Some(ts) => {
                    if ts > future_limit {
                        issues.push(format!(
                            "{LAST_UPDATED_KEY} is in the future: {}",
                            snapshot.last_updated
                        ));
                    } else if ts < past_limit {
                        warnings.push(format!(
                            "{LAST_UPDATED_KEY} is more than {} year(s) old: {}",
                            self.config.past_tolerance_years, snapshot.last_updated
                        ));
                    }
                    Some(ts)
                }
            }
        };

        for state in snapshot.categories.values() {
            let Some(last) = &state.last_posted else {
                continue;
            };
            let field = format!("last_{}_posted", state.singular);
            if last.timestamp.is_empty() {
                issues.push(format!("{field} has no timestamp"));
                continue;
            }
            match parse_timestamp(&last.timestamp) {
                None => issues.push(format!(
                    "{field}.timestamp is not a valid timestamp: {}",
                    last.timestamp
                )),
                Some(ts) if ts > future_limit => issues.push(format!(
                    "{field}.timestamp is in the future: {}",
                    last.timestamp
                )),
                Some(ts) if last_updated.is_some_and(|lu| ts > lu) => issues.push(format!(
                    "{field}.timestamp is newer than {LAST_UPDATED_KEY}: {}",
                    last.timestamp
                )),
                Some(_) => {}
            }
        }

        CheckResult::new(CheckKind::Timestamps, issues, warnings)
    }

    // -- consistency -------------------------------------------------------

    fn check_consistency(&self, snapshot: &Snapshot, selected: &[&Category]) -> CheckResult {
        let mut issues = Vec::new();

        for category in selected {
            let Some(state) = snapshot.category(&category.plural) else {
                continue;
            };
            // Unreadable catalogs are already reported by the id check.
            let Ok(catalog) = self.catalogs.catalog(category) else {
                continue;
            };

            if state.posted.len() > catalog.len() {
                issues.push(format!(
                    "{}: {} posted but the catalog has only {} item(s)",
                    category.plural,
                    state.posted.len(),
                    catalog.len()
                ));
                continue;
            }

            if let Some(last) = &state.last_posted
                && !state.posted.contains(&last.id)
            {
                issues.push(format!(
                    "{}: last posted id '{}' is not in the posted set",
                    category.plural, last.id
                ));
            }
        }

        CheckResult::new(CheckKind::Consistency, issues, Vec::new())
    }
}

fn check_sync_status(sync: &SyncSides) -> CheckResult {
    let mut warnings = Vec::new();

    match (&sync.remote, &sync.local) {
        (None, _) => warnings.push(sync.remote_note.as_ref().map_or_else(
            || "remote state not available".to_string(),
            |note| format!("remote state not available: {note}"),
        )),
        (Some(_), None) => warnings.push("local state file not found".to_string()),
        (Some(remote), Some(local)) => {
            let comparison = compare(remote, local);
            if !comparison.is_identical {
                warnings.push("remote and local state differ".to_string());
                for (category, diff) in &comparison.posted_diff {
                    warnings.push(format!(
                        "{category}: {} only in remote, {} only in local",
                        diff.only_in_a.len(),
                        diff.only_in_b.len()
                    ));
                }
                for (category, diff) in &comparison.cycle_diff {
                    warnings.push(format!(
                        "{category}: cycle count {} in remote, {} in local",
                        diff.a, diff.b
                    ));
                }
                warnings.push("run `rota sync --auto` to reconcile".to_string());
            }
        }
    }

    CheckResult::new(CheckKind::SyncStatus, Vec::new(), warnings)
}

fn unknown_keys<'m>(raw: &'m Map<String, Value>, known: &BTreeSet<String>) -> Vec<&'m str> {
    raw.keys()
        .filter(|k| !known.contains(*k))
        .map(String::as_str)
        .collect()
}

fn preview(ids: &[String]) -> String {
    let shown: Vec<&str> = ids.iter().take(ORPHAN_PREVIEW).map(String::as_str).collect();
    if ids.len() > ORPHAN_PREVIEW {
        format!("{} (+{} more)", shown.join(", "), ids.len() - ORPHAN_PREVIEW)
    } else {
        shown.join(", ")
    }
}

// ---------------------------------------------------------------------------
// Repository-level entry point
// ---------------------------------------------------------------------------

/// Validate the state a repository would load, and persist any fix.
///
/// The remote document is validated when reachable, else the local file,
/// else a fresh snapshot. A fix is saved through [`StateRepository::save`];
/// a failed save turns into an id-existence issue.
#[must_use]
pub fn validate_repository(
    repo: &StateRepository,
    validator: &Validator<'_>,
    options: &ValidateOptions,
) -> ValidationReport {
    let (remote_doc, remote_note) = match repo.read_remote_document() {
        Ok(doc) => (doc, (!repo.has_remote()).then(|| "remote store not configured".to_string())),
        Err(err) => {
            warn!(error = %err, "remote state unreadable during validation");
            (None, Some(err.to_string()))
        }
    };

    let local_doc = match repo.read_local_document() {
        Ok(doc) => doc,
        Err(err) => {
            warn!(error = %err, "local state unreadable during validation");
            if remote_doc.is_none() {
                let checks = CheckKind::ALL
                    .iter()
                    .map(|kind| match kind {
                        CheckKind::Structure => CheckResult::new(
                            CheckKind::Structure,
                            vec![format!("local state unreadable: {err}")],
                            Vec::new(),
                        ),
                        other => CheckResult::not_run(*other, "local state unreadable"),
                    })
                    .collect();
                return ValidationReport::from_checks(checks, options.now, "local", 0);
            }
            None
        }
    };

    let sync = SyncSides {
        local: local_doc
            .clone()
            .and_then(|d| Snapshot::from_document(d, repo.categories()).ok()),
        remote: remote_doc
            .clone()
            .and_then(|d| Snapshot::from_document(d, repo.categories()).ok()),
        remote_note,
    };

    let (document, source) = match (remote_doc, local_doc) {
        (Some(doc), _) => (doc, "remote"),
        (None, Some(doc)) => (doc, "local"),
        (None, None) => (repo.fresh().to_document(), "fresh"),
    };

    let Validation {
        mut report,
        fixed_snapshot,
    } = validator.run(&document, source, &sync, options);

    if let Some(mut snapshot) = fixed_snapshot {
        let outcome = repo.save(&mut snapshot);
        info!(fixed = report.fixed, outcome = %outcome, "orphaned ids removed");
        if let SaveOutcome::Unsaved { reason } = &outcome {
            if let Some(check) = report
                .checks
                .iter_mut()
                .find(|c| c.check == CheckKind::IdExistence)
            {
                check.issues.push(format!("fix could not be saved: {reason}"));
                check.passed = false;
                check.warning = false;
            }
            report = ValidationReport {
                saved: None,
                ..ValidationReport::from_checks(report.checks, options.now, source, report.fixed)
            };
        } else {
            report.saved = Some(outcome.to_string());
        }
    }

    report
}
