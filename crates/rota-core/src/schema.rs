//! Wire shape of the state document and its forward migration.
//!
//! ```json
//! {
//!   "posted_spells": ["lumos", "nox"],
//!   "last_spell_posted": {"id": "nox", "timestamp": "2025-01-31T09:00:00.123456Z"},
//!   "cycle_count": {"spells": 2},
//!   "last_updated": "2025-01-31T09:00:00.123456Z"
//! }
//! ```
//!
//! Documents carry no version field. Older documents simply lack the fields
//! of categories added since they were written; [`migrate`] fills those in.

use serde_json::{Map, Value};

use crate::category::Category;
use crate::error::ErrorCode;

/// Canonical shape produced by [`migrate`]: one posted array and one
/// last-posted slot per category, plus `cycle_count` and `last_updated`.
pub const SCHEMA_VERSION: u32 = 1;

pub const CYCLE_COUNT_KEY: &str = "cycle_count";
pub const LAST_UPDATED_KEY: &str = "last_updated";

/// The state document as raw JSON.
pub type RawSnapshot = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("state document must be a JSON object")]
    NotAnObject,

    #[error("field '{field}' must be {expected}")]
    WrongKind { field: String, expected: &'static str },
}

impl SchemaError {
    pub(crate) fn wrong_kind(field: impl Into<String>, expected: &'static str) -> Self {
        Self::WrongKind {
            field: field.into(),
            expected,
        }
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::SchemaMismatch
    }
}

/// Fill in every field `categories` need that `raw` lacks.
///
/// Adds `posted_<plural>: []`, `last_<singular>_posted: null`, a
/// `cycle_count` object, and `cycle_count[<plural>] = 0`. Existing values are
/// never touched, even when they have the wrong kind; decoding reports those.
#[must_use]
pub fn migrate(mut raw: RawSnapshot, categories: &[Category]) -> RawSnapshot {
    for category in categories {
        raw.entry(category.posted_key())
            .or_insert_with(|| Value::Array(Vec::new()));
        raw.entry(category.last_posted_key()).or_insert(Value::Null);
    }

    let counts = raw
        .entry(CYCLE_COUNT_KEY)
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(counts) = counts {
        for category in categories {
            counts
                .entry(category.plural.clone())
                .or_insert_with(|| Value::from(0));
        }
    }

    raw
}

/// Whether `raw` already has every field `categories` need.
#[must_use]
pub fn needs_migration(raw: &RawSnapshot, categories: &[Category]) -> bool {
    let counts = raw.get(CYCLE_COUNT_KEY).and_then(Value::as_object);
    categories.iter().any(|c| {
        !raw.contains_key(&c.posted_key())
            || !raw.contains_key(&c.last_posted_key())
            || counts.is_none_or(|m| !m.contains_key(&c.plural))
    })
}

/// Unwrap a document into its top-level object.
///
/// # Errors
///
/// [`SchemaError::NotAnObject`] for any other JSON value.
pub fn into_raw(document: Value) -> Result<RawSnapshot, SchemaError> {
    match document {
        Value::Object(map) => Ok(map),
        _ => Err(SchemaError::NotAnObject),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cats() -> Vec<Category> {
        vec![Category::new("spells", "spell"), Category::new("potions", "potion")]
    }

    #[test]
    fn empty_document_gains_every_field() {
        let migrated = migrate(Map::new(), &cats());
        assert_eq!(
            Value::Object(migrated),
            json!({
                "posted_spells": [],
                "last_spell_posted": null,
                "posted_potions": [],
                "last_potion_posted": null,
                "cycle_count": {"spells": 0, "potions": 0}
            })
        );
    }

    #[test]
    fn existing_data_is_untouched() {
        let raw = into_raw(json!({
            "posted_spells": ["lumos"],
            "last_spell_posted": {"id": "lumos", "timestamp": "2025-01-01T00:00:00Z"},
            "cycle_count": {"spells": 4},
            "last_updated": "2025-01-01T00:00:00Z",
            "legacy_field": true
        }))
        .expect("object");

        let migrated = migrate(raw.clone(), &cats());
        for (key, value) in &raw {
            if key != CYCLE_COUNT_KEY {
                assert_eq!(migrated.get(key), Some(value), "{key} changed");
            }
        }
        assert_eq!(migrated["cycle_count"], json!({"spells": 4, "potions": 0}));
        assert_eq!(migrated["posted_potions"], json!([]));
    }

    #[test]
    fn migrate_is_idempotent() {
        let once = migrate(into_raw(json!({"posted_spells": ["a"]})).expect("obj"), &cats());
        let twice = migrate(once.clone(), &cats());
        assert_eq!(once, twice);
        assert!(!needs_migration(&once, &cats()));
    }

    #[test]
    fn wrong_kind_cycle_count_left_for_decode() {
        let migrated = migrate(into_raw(json!({"cycle_count": 3})).expect("obj"), &cats());
        assert_eq!(migrated["cycle_count"], json!(3));
        assert!(needs_migration(&migrated, &cats()));
    }

    #[test]
    fn non_object_rejected() {
        assert_eq!(into_raw(json!([1, 2])), Err(SchemaError::NotAnObject));
    }
}
