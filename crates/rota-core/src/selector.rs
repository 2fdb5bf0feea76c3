//! Availability tracking for the publisher.
//!
//! The publisher calls [`available_items`] (or [`random_available_item`])
//! before publishing and [`mark_as_posted`] after. Exhausting a category is
//! the only thing that resets it.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::info;

use crate::catalog::{Catalog, CatalogItem};
use crate::category::Category;
use crate::repository::{SaveOutcome, StateRepository};
use crate::snapshot::{LastPosted, Snapshot, now_timestamp};

/// Items of `category` not yet posted in the current cycle, in catalog order.
///
/// When every catalog item has been posted, the category's posted set is
/// cleared, its cycle count goes up by one, and the whole catalog is
/// returned. An empty catalog returns nothing and resets nothing.
pub fn available_items<'a>(
    snapshot: &mut Snapshot,
    category: &Category,
    catalog: &'a Catalog,
) -> Vec<&'a CatalogItem> {
    if catalog.is_empty() {
        return Vec::new();
    }

    let state = snapshot.category_mut(category);
    let available: Vec<&CatalogItem> = catalog
        .items()
        .iter()
        .filter(|item| !state.posted.contains(&item.id))
        .collect();

    if !available.is_empty() {
        return available;
    }

    state.posted.clear();
    state.cycle_count = state.cycle_count.saturating_add(1);
    info!(
        category = %category.plural,
        cycle = state.cycle_count,
        "every item posted; starting a new cycle"
    );
    catalog.items().iter().collect()
}

/// Uniform random pick among [`available_items`].
pub fn random_available_item<'a, R: Rng + ?Sized>(
    snapshot: &mut Snapshot,
    category: &Category,
    catalog: &'a Catalog,
    rng: &mut R,
) -> Option<&'a CatalogItem> {
    available_items(snapshot, category, catalog)
        .choose(rng)
        .copied()
}

/// Record `id` as posted now. Adding an id twice is a no-op on the set.
pub fn record_post(snapshot: &mut Snapshot, category: &Category, id: &str) {
    let state = snapshot.category_mut(category);
    state.posted.insert(id.to_string());
    state.last_posted = Some(LastPosted {
        id: id.to_string(),
        timestamp: now_timestamp(),
    });
}

/// [`record_post`], then persist through `repo`.
pub fn mark_as_posted(
    repo: &StateRepository,
    snapshot: &mut Snapshot,
    category: &Category,
    id: &str,
) -> SaveOutcome {
    record_post(snapshot, category, id);
    repo.save(snapshot)
}

/// Per-category view of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryStats {
    pub category: String,
    pub posted: usize,
    pub cycles: i64,
    pub last_posted: Option<LastPostedView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastPostedView {
    pub id: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub categories: Vec<CategoryStats>,
    pub last_updated: String,
}

/// Counts for every configured category, in configuration order.
#[must_use]
pub fn stats(snapshot: &Snapshot, categories: &[Category]) -> Stats {
    let categories = categories
        .iter()
        .map(|category| {
            let state = snapshot.category(&category.plural);
            CategoryStats {
                category: category.plural.clone(),
                posted: state.map_or(0, |s| s.posted.len()),
                cycles: state.map_or(0, |s| s.cycle_count),
                last_posted: state.and_then(|s| s.last_posted.as_ref()).map(|lp| {
                    LastPostedView {
                        id: lp.id.clone(),
                        timestamp: lp.timestamp.clone(),
                    }
                }),
            }
        })
        .collect();

    Stats {
        categories,
        last_updated: snapshot.last_updated.clone(),
    }
}
