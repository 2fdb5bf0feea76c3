//! Snapshot comparison and union merge.
//!
//! # Merge semantics
//!
//! Per category, posted sets are unioned and cycle counts take the maximum,
//! so merging is commutative, associative and idempotent on both. The
//! last-posted marker takes the newer timestamp; on a tie the first argument
//! wins, which makes `merge(a, b)` and `merge(b, a)` differ only there.
//!
//! # Conflicts
//!
//! A category conflicts when each side holds ids the other lacks. One side
//! being a superset of the other is not a conflict: copying the superset
//! loses nothing.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use crate::snapshot::{CategoryState, LastPosted, Snapshot, compare_timestamps};

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PostedDiff {
    pub only_in_a: BTreeSet<String>,
    pub only_in_b: BTreeSet<String>,
}

impl PostedDiff {
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        !self.only_in_a.is_empty() && !self.only_in_b.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleDiff {
    pub a: i64,
    pub b: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComparisonResult {
    pub is_identical: bool,
    pub has_conflict: bool,
    /// `"A: <ts>, B: <ts>"` when the `last_updated` strings differ.
    pub timestamp_diff: Option<String>,
    /// Only categories whose posted sets differ.
    pub posted_diff: BTreeMap<String, PostedDiff>,
    /// Only categories whose cycle counts differ.
    pub cycle_diff: BTreeMap<String, CycleDiff>,
}

impl ComparisonResult {
    /// Categories where both sides hold ids the other lacks.
    #[must_use]
    pub fn conflicting_categories(&self) -> Vec<&str> {
        self.posted_diff
            .iter()
            .filter(|(_, diff)| diff.is_conflict())
            .map(|(category, _)| category.as_str())
            .collect()
    }
}

/// Diff `a` against `b`.
#[must_use]
pub fn compare(a: &Snapshot, b: &Snapshot) -> ComparisonResult {
    let mut result = ComparisonResult {
        is_identical: true,
        ..ComparisonResult::default()
    };

    if a.last_updated != b.last_updated {
        result.timestamp_diff = Some(format!("A: {}, B: {}", a.last_updated, b.last_updated));
        result.is_identical = false;
    }

    let empty = BTreeSet::new();
    for category in category_union(a, b) {
        let state_a = a.category(category);
        let state_b = b.category(category);
        let posted_a = state_a.map_or(&empty, |s| &s.posted);
        let posted_b = state_b.map_or(&empty, |s| &s.posted);

        let diff = PostedDiff {
            only_in_a: posted_a.difference(posted_b).cloned().collect(),
            only_in_b: posted_b.difference(posted_a).cloned().collect(),
        };
        if !diff.only_in_a.is_empty() || !diff.only_in_b.is_empty() {
            result.has_conflict |= diff.is_conflict();
            result.is_identical = false;
            result.posted_diff.insert(category.to_string(), diff);
        }

        let count_a = state_a.map_or(0, |s| s.cycle_count);
        let count_b = state_b.map_or(0, |s| s.cycle_count);
        if count_a != count_b {
            result.is_identical = false;
            result.cycle_diff.insert(
                category.to_string(),
                CycleDiff {
                    a: count_a,
                    b: count_b,
                },
            );
        }
    }

    result
}

fn category_union<'s>(a: &'s Snapshot, b: &'s Snapshot) -> BTreeSet<&'s str> {
    a.categories
        .keys()
        .chain(b.categories.keys())
        .map(String::as_str)
        .collect()
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Union-merge two snapshots. Ties favor `a`.
#[must_use]
pub fn merge(a: &Snapshot, b: &Snapshot) -> Snapshot {
    let mut categories = BTreeMap::new();
    for category in category_union(a, b) {
        let merged = match (a.category(category), b.category(category)) {
            (Some(sa), Some(sb)) => merge_category(sa, sb),
            (Some(only), None) | (None, Some(only)) => only.clone(),
            (None, None) => continue,
        };
        categories.insert(category.to_string(), merged);
    }

    let last_updated = if compare_timestamps(&a.last_updated, &b.last_updated) == Ordering::Less {
        b.last_updated.clone()
    } else {
        a.last_updated.clone()
    };

    let mut extra = b.extra.clone();
    extra.extend(a.extra.iter().map(|(k, v)| (k.clone(), v.clone())));

    let mut extra_cycle_counts = b.extra_cycle_counts.clone();
    for (key, value) in &a.extra_cycle_counts {
        let merged = match (value.as_i64(), extra_cycle_counts.get(key).and_then(Value::as_i64)) {
            (Some(x), Some(y)) => Value::from(x.max(y)),
            _ => value.clone(),
        };
        extra_cycle_counts.insert(key.clone(), merged);
    }

    Snapshot {
        categories,
        last_updated,
        extra,
        extra_cycle_counts,
    }
}

fn merge_category(a: &CategoryState, b: &CategoryState) -> CategoryState {
    CategoryState {
        singular: a.singular.clone(),
        posted: a.posted.union(&b.posted).cloned().collect(),
        last_posted: newer_last_posted(a.last_posted.as_ref(), b.last_posted.as_ref()),
        cycle_count: a.cycle_count.max(b.cycle_count),
    }
}

fn newer_last_posted(a: Option<&LastPosted>, b: Option<&LastPosted>) -> Option<LastPosted> {
    match (a, b) {
        (Some(a), Some(b)) => {
            if compare_timestamps(&a.timestamp, &b.timestamp) == Ordering::Less {
                Some(b.clone())
            } else {
                Some(a.clone())
            }
        }
        (Some(only), None) | (None, Some(only)) => Some(only.clone()),
        (None, None) => None,
    }
}

/// Sizes before and after a merge, per category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryMerge {
    pub category: String,
    pub a: usize,
    pub b: usize,
    pub merged: usize,
    pub cycle_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub categories: Vec<CategoryMerge>,
    pub last_updated: String,
}

impl MergeSummary {
    /// Describe how `merged` came out of `a` and `b`.
    #[must_use]
    pub fn between(a: &Snapshot, b: &Snapshot, merged: &Snapshot) -> Self {
        let size = |s: &Snapshot, c: &str| s.category(c).map_or(0, |st| st.posted.len());
        let categories = merged
            .categories
            .iter()
            .map(|(category, state)| CategoryMerge {
                category: category.clone(),
                a: size(a, category),
                b: size(b, category),
                merged: state.posted.len(),
                cycle_count: state.cycle_count,
            })
            .collect();
        Self {
            categories,
            last_updated: merged.last_updated.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Category;

    fn snap(posted: &[&str], cycle: i64, updated: &str) -> Snapshot {
        let mut s = Snapshot::empty(&[Category::new("spells", "spell")]);
        let state = s.categories.get_mut("spells").expect("spells");
        state.posted = posted.iter().map(|p| (*p).to_string()).collect();
        state.cycle_count = cycle;
        s.last_updated = updated.to_string();
        s
    }

    fn with_last(mut s: Snapshot, id: &str, ts: &str) -> Snapshot {
        s.categories.get_mut("spells").expect("spells").last_posted = Some(LastPosted {
            id: id.into(),
            timestamp: ts.into(),
        });
        s
    }

    #[test]
    fn identical_snapshots() {
        let a = snap(&["x"], 1, "t");
        let r = compare(&a, &a.clone());
        assert!(r.is_identical);
        assert!(!r.has_conflict);
        assert!(r.timestamp_diff.is_none());
    }

    #[test]
    fn two_sided_divergence_conflicts() {
        let a = snap(&["x", "shared"], 0, "t");
        let b = snap(&["y", "shared"], 0, "t");
        let r = compare(&a, &b);
        assert!(r.has_conflict);
        assert!(!r.is_identical);
        assert_eq!(r.conflicting_categories(), vec!["spells"]);
        let diff = &r.posted_diff["spells"];
        assert!(diff.only_in_a.contains("x"));
        assert!(diff.only_in_b.contains("y"));
    }

    #[test]
    fn superset_is_not_a_conflict() {
        let r = compare(&snap(&["x", "y"], 0, "t"), &snap(&["x"], 0, "t"));
        assert!(!r.has_conflict);
        assert!(!r.is_identical);
        assert!(r.conflicting_categories().is_empty());
    }

    #[test]
    fn cycle_and_timestamp_differences_are_recorded_only() {
        let r = compare(&snap(&[], 2, "t1"), &snap(&[], 3, "t2"));
        assert!(!r.has_conflict);
        assert!(!r.is_identical);
        assert_eq!(r.cycle_diff["spells"], CycleDiff { a: 2, b: 3 });
        assert_eq!(r.timestamp_diff.as_deref(), Some("A: t1, B: t2"));
    }

    #[test]
    fn merge_unions_and_takes_max() {
        let a = snap(&["x", "shared"], 4, "2025-01-01T00:00:00Z");
        let b = snap(&["y", "shared"], 2, "2025-02-01T00:00:00Z");
        let m = merge(&a, &b);
        let state = m.category("spells").expect("spells");
        assert_eq!(state.posted.len(), 3);
        assert_eq!(state.cycle_count, 4);
        assert_eq!(m.last_updated, "2025-02-01T00:00:00Z");

        let summary = MergeSummary::between(&a, &b, &m);
        assert_eq!(
            summary.categories[0],
            CategoryMerge {
                category: "spells".into(),
                a: 2,
                b: 2,
                merged: 3,
                cycle_count: 4
            }
        );
    }

    #[test]
    fn last_posted_newer_wins_and_ties_favor_first() {
        let a = with_last(snap(&[], 0, "t"), "old", "2025-01-01T00:00:00Z");
        let b = with_last(snap(&[], 0, "t"), "new", "2025-01-02T00:00:00Z");
        let newer = |m: &Snapshot| {
            m.category("spells")
                .and_then(|s| s.last_posted.clone())
                .map(|lp| lp.id)
        };
        assert_eq!(newer(&merge(&a, &b)).as_deref(), Some("new"));
        assert_eq!(newer(&merge(&b, &a)).as_deref(), Some("new"));

        let tie = with_last(snap(&[], 0, "t"), "other", "2025-01-01T00:00:00Z");
        assert_eq!(newer(&merge(&a, &tie)).as_deref(), Some("old"));
        assert_eq!(newer(&merge(&tie, &a)).as_deref(), Some("other"));
    }

    #[test]
    fn categories_and_extras_union() {
        let mut a = snap(&["x"], 0, "t");
        a.extra.insert("note".into(), Value::from("a"));
        a.extra_cycle_counts.insert("retired".into(), Value::from(2));
        let mut b = Snapshot::empty(&[Category::new("potions", "potion")]);
        b.categories
            .get_mut("potions")
            .expect("potions")
            .posted
            .insert("felix".into());
        b.extra.insert("note".into(), Value::from("b"));
        b.extra.insert("other".into(), Value::from(1));
        b.extra_cycle_counts.insert("retired".into(), Value::from(5));

        let m = merge(&a, &b);
        assert!(m.category("spells").is_some());
        assert!(m.category("potions").is_some());
        assert_eq!(m.extra["note"], Value::from("a"));
        assert_eq!(m.extra["other"], Value::from(1));
        assert_eq!(m.extra_cycle_counts["retired"], Value::from(5));
    }
}
