//! Typed state snapshot.
//!
//! A [`Snapshot`] is a plain value: loading, comparing and merging all work on
//! independent copies, and only the repository writes one back.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use tracing::debug;

use crate::category::{Category, last_posted_key, posted_key};
use crate::schema::{
    CYCLE_COUNT_KEY, LAST_UPDATED_KEY, RawSnapshot, SCHEMA_VERSION, SchemaError, into_raw,
    migrate, needs_migration,
};

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Current UTC instant as `2025-01-31T09:00:00.123456Z`.
#[must_use]
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 instant. Offset-less values are taken as UTC.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Order two stored timestamps chronologically, falling back to byte order
/// when either side does not parse.
#[must_use]
pub fn compare_timestamps(a: &str, b: &str) -> Ordering {
    match (parse_timestamp(a), parse_timestamp(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Most recent publication in a category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastPosted {
    pub id: String,
    pub timestamp: String,
}

/// Tracking state for one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryState {
    pub singular: String,
    pub posted: BTreeSet<String>,
    pub last_posted: Option<LastPosted>,
    /// Completed cycles. Signed so that corrupt negative values survive
    /// decoding and reach the validator.
    pub cycle_count: i64,
}

impl CategoryState {
    pub fn new(singular: impl Into<String>) -> Self {
        Self {
            singular: singular.into(),
            posted: BTreeSet::new(),
            last_posted: None,
            cycle_count: 0,
        }
    }
}

/// The whole tracked state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Keyed by plural category name.
    pub categories: BTreeMap<String, CategoryState>,
    /// Stored verbatim; empty when the document had none.
    pub last_updated: String,
    /// Top-level fields that belong to no configured category.
    pub extra: BTreeMap<String, Value>,
    /// `cycle_count` entries for categories that are not configured.
    pub extra_cycle_counts: BTreeMap<String, Value>,
}

impl Snapshot {
    /// All categories empty, stamped now.
    #[must_use]
    pub fn fresh(categories: &[Category]) -> Self {
        let mut snapshot = Self::empty(categories);
        snapshot.last_updated = now_timestamp();
        snapshot
    }

    /// All categories empty, no timestamp.
    #[must_use]
    pub fn empty(categories: &[Category]) -> Self {
        Self {
            categories: categories
                .iter()
                .map(|c| (c.plural.clone(), CategoryState::new(c.singular.clone())))
                .collect(),
            last_updated: String::new(),
            extra: BTreeMap::new(),
            extra_cycle_counts: BTreeMap::new(),
        }
    }

    /// Validate, migrate and decode a whole document.
    ///
    /// # Errors
    ///
    /// Any [`SchemaError`] from [`into_raw`] or [`Snapshot::decode`].
    pub fn from_document(document: Value, categories: &[Category]) -> Result<Self, SchemaError> {
        let raw = into_raw(document)?;
        if needs_migration(&raw, categories) {
            debug!(schema_version = SCHEMA_VERSION, "upgrading state document");
        }
        Self::decode(migrate(raw, categories), categories)
    }

    /// Decode an already-migrated raw document.
    ///
    /// Duplicate posted ids collapse, integral floats are accepted as cycle
    /// counts, and a missing or null `last_updated` becomes `""`.
    ///
    /// # Errors
    ///
    /// [`SchemaError::WrongKind`] when a known field holds the wrong JSON
    /// kind.
    pub fn decode(mut raw: RawSnapshot, categories: &[Category]) -> Result<Self, SchemaError> {
        let mut counts = match raw.remove(CYCLE_COUNT_KEY) {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(SchemaError::wrong_kind(CYCLE_COUNT_KEY, "an object")),
        };

        let last_updated = match raw.remove(LAST_UPDATED_KEY) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s,
            Some(_) => return Err(SchemaError::wrong_kind(LAST_UPDATED_KEY, "a string")),
        };

        let mut states = BTreeMap::new();
        for category in categories {
            let posted_field = category.posted_key();
            let last_field = category.last_posted_key();
            let state = CategoryState {
                singular: category.singular.clone(),
                posted: decode_posted(&posted_field, raw.remove(&posted_field))?,
                last_posted: decode_last_posted(&last_field, raw.remove(&last_field))?,
                cycle_count: decode_count(&category.plural, counts.remove(&category.plural))?,
            };
            states.insert(category.plural.clone(), state);
        }

        Ok(Self {
            categories: states,
            last_updated,
            extra: raw.into_iter().collect(),
            extra_cycle_counts: counts.into_iter().collect(),
        })
    }

    /// Wire form of this snapshot. Keys come out sorted.
    #[must_use]
    pub fn encode(&self) -> RawSnapshot {
        let mut raw: RawSnapshot = self
            .extra
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut counts: Map<String, Value> = self
            .extra_cycle_counts
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (plural, state) in &self.categories {
            raw.insert(
                posted_key(plural),
                Value::Array(state.posted.iter().cloned().map(Value::String).collect()),
            );
            let last = state.last_posted.as_ref().map_or(Value::Null, |lp| {
                let mut obj = Map::new();
                obj.insert("id".into(), Value::String(lp.id.clone()));
                obj.insert("timestamp".into(), Value::String(lp.timestamp.clone()));
                Value::Object(obj)
            });
            raw.insert(last_posted_key(&state.singular), last);
            counts.insert(plural.clone(), Value::from(state.cycle_count));
        }

        raw.insert(CYCLE_COUNT_KEY.into(), Value::Object(counts));
        raw.insert(
            LAST_UPDATED_KEY.into(),
            Value::String(self.last_updated.clone()),
        );
        raw
    }

    /// Wire form as a JSON value.
    #[must_use]
    pub fn to_document(&self) -> Value {
        Value::Object(self.encode())
    }

    #[must_use]
    pub fn category(&self, plural: &str) -> Option<&CategoryState> {
        self.categories.get(plural)
    }

    /// State for `category`, created empty when absent.
    pub fn category_mut(&mut self, category: &Category) -> &mut CategoryState {
        self.categories
            .entry(category.plural.clone())
            .or_insert_with(|| CategoryState::new(category.singular.clone()))
    }

    /// Set `last_updated` to now.
    pub fn touch(&mut self) {
        self.last_updated = now_timestamp();
    }
}

fn decode_posted(field: &str, value: Option<Value>) -> Result<BTreeSet<String>, SchemaError> {
    match value {
        None | Some(Value::Null) => Ok(BTreeSet::new()),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(id) => Ok(id),
                _ => Err(SchemaError::wrong_kind(field, "an array of strings")),
            })
            .collect(),
        Some(_) => Err(SchemaError::wrong_kind(field, "an array of strings")),
    }
}

fn decode_last_posted(field: &str, value: Option<Value>) -> Result<Option<LastPosted>, SchemaError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(mut obj)) => {
            let Some(Value::String(id)) = obj.remove("id") else {
                return Err(SchemaError::wrong_kind(
                    format!("{field}.id"),
                    "a string",
                ));
            };
            let timestamp = match obj.remove("timestamp") {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(ts)) => ts,
                Some(_) => {
                    return Err(SchemaError::wrong_kind(
                        format!("{field}.timestamp"),
                        "a string",
                    ));
                }
            };
            Ok(Some(LastPosted { id, timestamp }))
        }
        Some(_) => Err(SchemaError::wrong_kind(field, "an object or null")),
    }
}

fn decode_count(plural: &str, value: Option<Value>) -> Result<i64, SchemaError> {
    let field = || format!("{CYCLE_COUNT_KEY}.{plural}");
    match value {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                return Ok(i);
            }
            match n.as_f64() {
                Some(f) if f.fract().abs() < f64::EPSILON && f.abs() < 9.0e15 => {
                    Ok(integral_float(f))
                }
                _ => Err(SchemaError::wrong_kind(field(), "an integer")),
            }
        }
        Some(_) => Err(SchemaError::wrong_kind(field(), "an integer")),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn integral_float(f: f64) -> i64 {
    f as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cats() -> Vec<Category> {
        vec![Category::new("spells", "spell"), Category::new("potions", "potion")]
    }

    #[test]
    fn decode_full_document() {
        let snap = Snapshot::from_document(
            json!({
                "posted_spells": ["nox", "lumos", "nox"],
                "last_spell_posted": {"id": "nox", "timestamp": "2025-01-31T09:00:00Z"},
                "cycle_count": {"spells": 2.0, "retired": 7},
                "last_updated": "2025-01-31T09:00:01Z",
                "posted_retired": ["x"]
            }),
            &cats(),
        )
        .expect("decodes");

        let spells = snap.category("spells").expect("spells");
        assert_eq!(spells.posted.len(), 2);
        assert_eq!(spells.cycle_count, 2);
        assert_eq!(spells.last_posted.as_ref().map(|lp| lp.id.as_str()), Some("nox"));

        let potions = snap.category("potions").expect("migrated in");
        assert!(potions.posted.is_empty());
        assert_eq!(potions.cycle_count, 0);

        assert_eq!(snap.extra.get("posted_retired"), Some(&json!(["x"])));
        assert_eq!(snap.extra_cycle_counts.get("retired"), Some(&json!(7)));
    }

    #[test]
    fn encode_preserves_unknown_fields() {
        let doc = json!({
            "posted_spells": ["lumos"],
            "last_spell_posted": null,
            "posted_potions": [],
            "last_potion_posted": null,
            "cycle_count": {"spells": 1, "potions": 0, "retired": 3},
            "last_updated": "2025-01-31T09:00:01Z",
            "note": "keep me"
        });
        let snap = Snapshot::from_document(doc.clone(), &cats()).expect("decodes");
        assert_eq!(snap.to_document(), doc);
    }

    #[test]
    fn missing_last_updated_is_empty() {
        let snap = Snapshot::from_document(json!({}), &cats()).expect("decodes");
        assert_eq!(snap.last_updated, "");
        assert_eq!(snap.to_document()["last_updated"], "");
    }

    #[test]
    fn wrong_kinds_are_schema_errors() {
        let cases = [
            (json!({"posted_spells": "lumos"}), "posted_spells"),
            (json!({"posted_spells": [1]}), "posted_spells"),
            (json!({"cycle_count": []}), "cycle_count"),
            (json!({"cycle_count": {"spells": 1.5}}), "cycle_count.spells"),
            (json!({"last_spell_posted": 3}), "last_spell_posted"),
            (json!({"last_spell_posted": {"timestamp": "x"}}), "last_spell_posted.id"),
            (json!({"last_updated": 5}), "last_updated"),
        ];
        for (doc, field) in cases {
            match Snapshot::from_document(doc, &cats()) {
                Err(SchemaError::WrongKind { field: got, .. }) => assert_eq!(got, field),
                other => panic!("expected WrongKind for {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn negative_counts_survive_decoding() {
        let snap = Snapshot::from_document(json!({"cycle_count": {"spells": -2}}), &cats())
            .expect("decodes");
        assert_eq!(snap.category("spells").map(|s| s.cycle_count), Some(-2));
    }

    #[test]
    fn timestamp_format_and_order() {
        let ts = now_timestamp();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2025-01-31T09:00:00.123456Z".len());

        assert_eq!(
            compare_timestamps("2025-01-31T09:00:00Z", "2025-01-31T10:00:00+01:00"),
            Ordering::Equal
        );
        assert_eq!(
            compare_timestamps("2025-01-31T09:00:00.5Z", "2025-01-31T09:00:00Z"),
            Ordering::Greater
        );
        assert_eq!(compare_timestamps("", "2025-01-01T00:00:00Z"), Ordering::Less);
        assert!(parse_timestamp("2025-01-31T09:00:00.123456").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn category_mut_creates_missing() {
        let mut snap = Snapshot::empty(&[]);
        snap.category_mut(&Category::new("potions", "potion"))
            .posted
            .insert("felix".into());
        assert_eq!(snap.to_document()["posted_potions"], json!(["felix"]));
        assert_eq!(snap.to_document()["last_potion_posted"], Value::Null);
    }
}
