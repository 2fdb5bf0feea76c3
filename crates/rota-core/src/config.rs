use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::category::{Category, default_categories};
use crate::error::ErrorCode;

/// Project config location relative to the project root.
pub const PROJECT_CONFIG_PATH: &str = ".rota/config.toml";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::ConfigParseError
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotaConfig {
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default = "default_categories")]
    pub categories: Vec<Category>,
}

impl Default for RotaConfig {
    fn default() -> Self {
        Self {
            state: StateConfig::default(),
            remote: RemoteConfig::default(),
            validation: ValidationConfig::default(),
            catalog: CatalogConfig::default(),
            categories: default_categories(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_state_file")]
    pub file_name: String,
    #[serde(default = "default_state_file")]
    pub remote_file_name: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
            file_name: default_state_file(),
            remote_file_name: default_state_file(),
        }
    }
}

impl StateConfig {
    /// Full path of the local state file.
    #[must_use]
    pub fn local_path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub document_id: Option<String>,
    /// Never read from or written to config files; environment only.
    #[serde(skip)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            document_id: None,
            token: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RemoteConfig {
    /// Per-call timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Delay before the first retry.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Document id and token, when both are present.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.document_id.as_deref(), self.token.as_deref()) {
            (Some(id), Some(token)) if !id.is_empty() && !token.is_empty() => Some((id, token)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_max_cycle_count")]
    pub max_cycle_count: i64,
    #[serde(default = "default_future_tolerance_minutes")]
    pub future_tolerance_minutes: i64,
    #[serde(default = "default_past_tolerance_years")]
    pub past_tolerance_years: u32,
    /// Categories that older documents may lack entirely; their absence is a
    /// warning rather than a structural failure.
    #[serde(default = "default_legacy_optional")]
    pub legacy_optional: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_cycle_count: default_max_cycle_count(),
            future_tolerance_minutes: default_future_tolerance_minutes(),
            past_tolerance_years: default_past_tolerance_years(),
            legacy_optional: default_legacy_optional(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_dir")]
    pub dir: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            dir: default_catalog_dir(),
        }
    }
}

impl RotaConfig {
    /// Catalog file for a category, honoring per-category overrides.
    #[must_use]
    pub fn catalog_path(&self, category: &Category) -> PathBuf {
        category
            .file
            .clone()
            .unwrap_or_else(|| self.catalog.dir.join(category.default_catalog_file()))
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// `ROTA_DOCUMENT_ID`, `ROTA_API_URL`, and the token from `ROTA_TOKEN`,
    /// then `GIST_TOKEN`, then `GITHUB_TOKEN`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(id) = non_empty("ROTA_DOCUMENT_ID") {
            self.remote.document_id = Some(id);
        }
        if let Some(url) = non_empty("ROTA_API_URL") {
            self.remote.api_url = url;
        }
        if let Some(token) = non_empty("ROTA_TOKEN")
            .or_else(|| non_empty("GIST_TOKEN"))
            .or_else(|| non_empty("GITHUB_TOKEN"))
        {
            self.remote.token = Some(token);
        }
    }

    /// Anchor relative paths at `root`.
    pub fn resolve_paths(&mut self, root: &Path) {
        if self.state.dir.is_relative() {
            self.state.dir = root.join(&self.state.dir);
        }
        if self.catalog.dir.is_relative() {
            self.catalog.dir = root.join(&self.catalog.dir);
        }
        for category in &mut self.categories {
            if let Some(file) = category.file.as_mut()
                && file.is_relative()
            {
                *file = root.join(&*file);
            }
        }
    }

    /// Reject configurations the engine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.categories.is_empty() {
            return Err(ConfigError::Invalid("at least one category is required".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for category in &self.categories {
            if category.plural.is_empty() || category.singular.is_empty() {
                return Err(ConfigError::Invalid(
                    "category names must not be empty".into(),
                ));
            }
            if !seen.insert(category.plural.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate category '{}'",
                    category.plural
                )));
            }
        }
        if self.remote.max_retries == 0 {
            return Err(ConfigError::Invalid("remote.max_retries must be at least 1".into()));
        }
        if self.remote.backoff_factor == 0 {
            return Err(ConfigError::Invalid(
                "remote.backoff_factor must be at least 1".into(),
            ));
        }
        if self.validation.max_cycle_count < 0 {
            return Err(ConfigError::Invalid(
                "validation.max_cycle_count must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// Resolve the effective configuration for a project.
///
/// Layers, lowest to highest precedence: built-in defaults, the user config
/// (`<config dir>/rota/config.toml`), the project config (`explicit` when
/// given, else `.rota/config.toml` under `project_root`), and environment
/// variables.
///
/// # Errors
///
/// Returns an error when a config file cannot be read or parsed, when an
/// explicit config path does not exist, or when the result fails
/// [`RotaConfig::validate`].
pub fn load_config(project_root: &Path, explicit: Option<&Path>) -> Result<RotaConfig, ConfigError> {
    let user = dirs::config_dir().map(|dir| dir.join("rota/config.toml"));
    let mut config = load_layers(project_root, user.as_deref(), explicit)?;
    config.apply_env(|key| std::env::var(key).ok());
    config.resolve_paths(project_root);
    config.validate()?;
    Ok(config)
}

fn load_layers(
    project_root: &Path,
    user_path: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<RotaConfig, ConfigError> {
    let mut merged = toml::Table::new();

    if let Some(path) = user_path.filter(|p| p.exists()) {
        merge_tables(&mut merged, read_table(path)?);
    }

    match explicit {
        Some(path) => merge_tables(&mut merged, read_table(path)?),
        None => {
            let path = project_root.join(PROJECT_CONFIG_PATH);
            if path.exists() {
                merge_tables(&mut merged, read_table(&path)?);
            }
        }
    }

    RotaConfig::deserialize(toml::Value::Table(merged))
        .map_err(|err| ConfigError::Invalid(err.to_string()))
}

fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<toml::Table>(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Deep-merge `overlay` into `base`; nested tables merge, everything else
/// (including arrays such as `categories`) is replaced.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_state_file() -> String {
    "glossary_state.json".to_string()
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

const fn default_timeout_secs() -> u64 {
    10
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_retry_delay_ms() -> u64 {
    1_000
}

const fn default_backoff_factor() -> u32 {
    2
}

const fn default_max_cycle_count() -> i64 {
    1_000
}

const fn default_future_tolerance_minutes() -> i64 {
    5
}

const fn default_past_tolerance_years() -> u32 {
    1
}

fn default_legacy_optional() -> Vec<String> {
    [
        "creatures",
        "objects",
        "locations",
        "organizations",
        "concepts",
        "characters",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_catalog_dir() -> PathBuf {
    PathBuf::from("data/production/glossary")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, content).expect("write config");
    }

    #[test]
    fn missing_configs_use_defaults() {
        let root = TempDir::new().expect("tmp");
        let cfg = load_layers(root.path(), None, None).expect("load should succeed");
        assert_eq!(cfg.state.file_name, "glossary_state.json");
        assert_eq!(cfg.remote.max_retries, 3);
        assert_eq!(cfg.remote.retry_delay(), Duration::from_secs(1));
        assert_eq!(cfg.remote.backoff_factor, 2);
        assert_eq!(cfg.remote.timeout(), Duration::from_secs(10));
        assert_eq!(cfg.validation.max_cycle_count, 1_000);
        assert_eq!(cfg.categories.len(), 8);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn project_config_overrides_user_config() {
        let root = TempDir::new().expect("tmp");
        let user = root.path().join("user/rota/config.toml");
        write(
            &user,
            "[remote]\nmax_retries = 5\ntimeout_secs = 30\n[state]\nfile_name = \"user.json\"\n",
        );
        write(
            &root.path().join(PROJECT_CONFIG_PATH),
            "[remote]\nmax_retries = 2\n",
        );

        let cfg = load_layers(root.path(), Some(&user), None).expect("load");
        assert_eq!(cfg.remote.max_retries, 2);
        assert_eq!(cfg.remote.timeout_secs, 30);
        assert_eq!(cfg.state.file_name, "user.json");
    }

    #[test]
    fn explicit_config_replaces_project_config() {
        let root = TempDir::new().expect("tmp");
        write(&root.path().join(PROJECT_CONFIG_PATH), "[remote]\nmax_retries = 9\n");
        let explicit = root.path().join("alt.toml");
        write(
            &explicit,
            "[[categories]]\nplural = \"birthdays\"\nsingular = \"birthday\"\nfile = \"cal/b.json\"\n",
        );

        let mut cfg = load_layers(root.path(), None, Some(&explicit)).expect("load");
        assert_eq!(cfg.remote.max_retries, 3);
        assert_eq!(cfg.categories.len(), 1);

        cfg.resolve_paths(root.path());
        assert_eq!(
            cfg.catalog_path(&cfg.categories[0]),
            root.path().join("cal/b.json")
        );
    }

    #[test]
    fn parse_error_reports_path() {
        let root = TempDir::new().expect("tmp");
        let path = root.path().join(PROJECT_CONFIG_PATH);
        write(&path, "[remote\n");
        let err = load_layers(root.path(), None, None).expect_err("must fail");
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn env_token_precedence() {
        let env: HashMap<&str, &str> = [
            ("GITHUB_TOKEN", "gh"),
            ("GIST_TOKEN", "gist"),
            ("ROTA_DOCUMENT_ID", "abc123"),
        ]
        .into_iter()
        .collect();

        let mut cfg = RotaConfig::default();
        cfg.apply_env(|key| env.get(key).map(|v| (*v).to_string()));
        assert_eq!(cfg.remote.token.as_deref(), Some("gist"));
        assert_eq!(cfg.remote.credentials(), Some(("abc123", "gist")));
    }

    #[test]
    fn credentials_require_both_parts() {
        let mut cfg = RotaConfig::default();
        cfg.remote.token = Some("t".into());
        assert!(cfg.remote.credentials().is_none());
        cfg.remote.document_id = Some(String::new());
        assert!(cfg.remote.credentials().is_none());
    }

    #[test]
    fn duplicate_categories_rejected() {
        let mut cfg = RotaConfig::default();
        cfg.categories.push(Category::new("spells", "spell"));
        let err = cfg.validate().expect_err("duplicate must fail");
        assert!(err.to_string().contains("duplicate category 'spells'"));
    }

    #[test]
    fn relative_paths_resolve_against_root() {
        let mut cfg = RotaConfig::default();
        cfg.resolve_paths(Path::new("/srv/bot"));
        assert_eq!(
            cfg.state.local_path(),
            PathBuf::from("/srv/bot/data/glossary_state.json")
        );
        assert_eq!(
            cfg.catalog_path(&cfg.categories[0]),
            PathBuf::from("/srv/bot/data/production/glossary/spells.json")
        );
    }
}
