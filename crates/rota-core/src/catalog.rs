//! Catalog ingestion.
//!
//! A catalog is the external, read-only list of items a category can draw
//! from. On disk it is either a bare JSON array of items or an object with a
//! `data` array; both normalize into [`Catalog`] once, at load time.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::category::Category;
use crate::config::RotaConfig;
use crate::error::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog file not found: {}", path.display())]
    Missing { path: PathBuf },

    #[error("failed to read catalog {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("catalog {} is not valid JSON: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("catalog must be an array or an object with a 'data' array")]
    Shape,

    #[error("catalog item {index} has no string 'id'")]
    MissingId { index: usize },
}

impl CatalogError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::CatalogUnreadable
    }
}

/// One catalog entry. Only `id` is interpreted; the rest rides along for the
/// publisher.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItem {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl CatalogItem {
    /// Build an item with no extra fields.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Display name for terminal output: `name`, then `title`, then the id.
    #[must_use]
    pub fn label(&self) -> &str {
        ["name", "title"]
            .iter()
            .find_map(|key| self.fields.get(*key).and_then(Value::as_str))
            .unwrap_or(&self.id)
    }
}

/// Normalized item list for one category, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    items: Vec<CatalogItem>,
    /// Id to position in `items`; the first occurrence wins.
    index: HashMap<String, usize>,
}

impl Catalog {
    #[must_use]
    pub fn new(items: Vec<CatalogItem>) -> Self {
        let mut index = HashMap::with_capacity(items.len());
        for (position, item) in items.iter().enumerate() {
            index.entry(item.id.clone()).or_insert(position);
        }
        Self { items, index }
    }

    /// Catalog of bare ids, mostly for tests and tooling.
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ids.into_iter().map(CatalogItem::new).collect())
    }

    /// Normalize either accepted document shape.
    ///
    /// Repeated ids keep their first occurrence.
    ///
    /// # Errors
    ///
    /// [`CatalogError::Shape`] when the document is neither an array nor an
    /// object with a `data` array, [`CatalogError::MissingId`] when an item
    /// lacks a string `id`.
    pub fn from_value(value: Value) -> Result<Self, CatalogError> {
        let raw_items = match value {
            Value::Array(items) => items,
            Value::Object(mut obj) => match obj.remove("data") {
                Some(Value::Array(items)) => items,
                _ => return Err(CatalogError::Shape),
            },
            _ => return Err(CatalogError::Shape),
        };

        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(raw_items.len());
        for (index, raw) in raw_items.into_iter().enumerate() {
            let Value::Object(mut fields) = raw else {
                return Err(CatalogError::MissingId { index });
            };
            let Some(Value::String(id)) = fields.remove("id") else {
                return Err(CatalogError::MissingId { index });
            };
            if seen.insert(id.clone()) {
                items.push(CatalogItem { id, fields });
            } else {
                tracing::debug!(%id, "duplicate catalog id ignored");
            }
        }
        Ok(Self::new(items))
    }

    /// Read and normalize a catalog file.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Missing`] when the file does not exist, and
    /// read, JSON, or shape errors otherwise.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CatalogError::Missing {
                    path: path.to_path_buf(),
                });
            }
            Err(source) => {
                return Err(CatalogError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let value = serde_json::from_str(&content).map_err(|source| CatalogError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_value(value)
    }

    #[must_use]
    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.id.as_str())
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&CatalogItem> {
        self.index.get(id).and_then(|&position| self.items.get(position))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Source of catalogs keyed by category.
pub trait CatalogSource {
    /// Load the catalog for `category`.
    ///
    /// # Errors
    ///
    /// Implementation-defined; the file-backed source returns
    /// [`CatalogError`] for missing or malformed files.
    fn catalog(&self, category: &Category) -> Result<Catalog, CatalogError>;
}

/// Catalogs read from `<catalog dir>/<plural>.json` or per-category overrides.
#[derive(Debug, Clone)]
pub struct CatalogDir {
    dir: PathBuf,
}

impl CatalogDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn from_config(config: &RotaConfig) -> Self {
        Self::new(config.catalog.dir.clone())
    }

    #[must_use]
    pub fn path_for(&self, category: &Category) -> PathBuf {
        category
            .file
            .clone()
            .unwrap_or_else(|| self.dir.join(category.default_catalog_file()))
    }
}

impl CatalogSource for CatalogDir {
    fn catalog(&self, category: &Category) -> Result<Catalog, CatalogError> {
        Catalog::load(&self.path_for(category))
    }
}

/// In-memory catalogs keyed by plural name. Unknown categories are missing.
impl CatalogSource for BTreeMap<String, Catalog> {
    fn catalog(&self, category: &Category) -> Result<Catalog, CatalogError> {
        self.get(&category.plural)
            .cloned()
            .ok_or_else(|| CatalogError::Missing {
                path: PathBuf::from(category.default_catalog_file()),
            })
    }
}
