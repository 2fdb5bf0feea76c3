//! Category naming.
//!
//! A category is addressed by its plural name everywhere in the API
//! (`spells`, `cycle_count["spells"]`). The singular only exists to build the
//! `last_<singular>_posted` wire field.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One configured content category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Plural name, used as the category key (`spells`).
    pub plural: String,
    /// Singular name, used in `last_<singular>_posted` (`spell`).
    pub singular: String,
    /// Catalog file override; defaults to `<catalog dir>/<plural>.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Category {
    /// Create a category from its plural and singular names.
    pub fn new(plural: impl Into<String>, singular: impl Into<String>) -> Self {
        Self {
            plural: plural.into(),
            singular: singular.into(),
            file: None,
        }
    }

    /// Wire field holding the posted-id array.
    #[must_use]
    pub fn posted_key(&self) -> String {
        posted_key(&self.plural)
    }

    /// Wire field holding the last-posted marker.
    #[must_use]
    pub fn last_posted_key(&self) -> String {
        last_posted_key(&self.singular)
    }

    /// Catalog file name when no override is configured.
    #[must_use]
    pub fn default_catalog_file(&self) -> String {
        format!("{}.json", self.plural)
    }
}

/// `posted_<plural>`
#[must_use]
pub fn posted_key(plural: &str) -> String {
    format!("posted_{plural}")
}

/// `last_<singular>_posted`
#[must_use]
pub fn last_posted_key(singular: &str) -> String {
    format!("last_{singular}_posted")
}

/// The built-in glossary categories.
#[must_use]
pub fn default_categories() -> Vec<Category> {
    [
        ("spells", "spell"),
        ("potions", "potion"),
        ("creatures", "creature"),
        ("objects", "object"),
        ("locations", "location"),
        ("organizations", "organization"),
        ("concepts", "concept"),
        ("characters", "character"),
    ]
    .into_iter()
    .map(|(plural, singular)| Category::new(plural, singular))
    .collect()
}

/// Look up a configured category by plural or singular name.
#[must_use]
pub fn find<'a>(categories: &'a [Category], name: &str) -> Option<&'a Category> {
    categories
        .iter()
        .find(|c| c.plural == name || c.singular == name)
}
