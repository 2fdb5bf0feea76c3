//! Persistence of the state snapshot.
//!
//! The remote document is authoritative when it is reachable; the local file
//! is the fallback and the mirror. Neither [`StateRepository::load`] nor
//! [`StateRepository::save`] lets a remote failure reach the caller: load
//! falls back to the local file, save falls back to writing it.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::category::Category;
use crate::config::RotaConfig;
use crate::error::{ErrorCode, RemoteError};
use crate::remote::{DocumentClient, RemoteStore, client_from_config};
use crate::schema::SchemaError;
use crate::snapshot::Snapshot;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{} is not valid JSON: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{origin} state has an unexpected shape: {source}")]
    Schema {
        origin: &'static str,
        source: SchemaError,
    },

    #[error("remote store: {0}")]
    Remote(#[from] RemoteError),

    #[error("no remote store configured")]
    RemoteNotConfigured,
}

impl RepositoryError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Read { .. } | Self::Json { .. } | Self::Schema { .. } => ErrorCode::SchemaMismatch,
            Self::Write { .. } => ErrorCode::LocalStateWriteFailed,
            Self::Remote(err) => err.code(),
            Self::RemoteNotConfigured => ErrorCode::RemoteNotConfigured,
        }
    }
}

/// Where a save ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Written to the remote document.
    Remote,
    /// Written to the local file only.
    Local { reason: String },
    /// Written nowhere.
    Unsaved { reason: String },
}

impl SaveOutcome {
    #[must_use]
    pub const fn is_saved(&self) -> bool {
        !matches!(self, Self::Unsaved { .. })
    }
}

impl std::fmt::Display for SaveOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote => write!(f, "saved to remote"),
            Self::Local { reason } => write!(f, "saved locally ({reason})"),
            Self::Unsaved { reason } => write!(f, "not saved: {reason}"),
        }
    }
}

/// Owns the on-disk and remote copies of the snapshot.
pub struct StateRepository {
    local_path: PathBuf,
    categories: Vec<Category>,
    remote: Option<Box<dyn RemoteStore>>,
}

impl std::fmt::Debug for StateRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateRepository")
            .field("local_path", &self.local_path)
            .field("categories", &self.categories.len())
            .field("remote", &self.remote.as_ref().map(|r| r.describe()))
            .finish()
    }
}

impl StateRepository {
    pub fn new(
        local_path: impl Into<PathBuf>,
        categories: Vec<Category>,
        remote: Option<Box<dyn RemoteStore>>,
    ) -> Self {
        Self {
            local_path: local_path.into(),
            categories,
            remote,
        }
    }

    /// Repository for a resolved configuration. Runs local-only when the
    /// document id or token is missing.
    #[must_use]
    pub fn from_config(config: &RotaConfig) -> Self {
        let remote = config.remote.credentials().and_then(|(id, _)| {
            client_from_config(&config.remote).map(|client| {
                Box::new(DocumentClient::new(
                    client,
                    id,
                    config.state.remote_file_name.clone(),
                )) as Box<dyn RemoteStore>
            })
        });

        if remote.is_none() {
            warn!("remote store not configured (set ROTA_DOCUMENT_ID and ROTA_TOKEN); using local file only");
        }

        Self::new(config.state.local_path(), config.categories.clone(), remote)
    }

    #[must_use]
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// `<stem>.backup.json` next to the local file.
    #[must_use]
    pub fn backup_path(&self) -> PathBuf {
        let stem = self
            .local_path
            .file_stem()
            .map_or_else(|| "state".to_string(), |s| s.to_string_lossy().into_owned());
        self.local_path.with_file_name(format!("{stem}.backup.json"))
    }

    #[must_use]
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    #[must_use]
    pub const fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    #[must_use]
    pub fn remote_label(&self) -> Option<String> {
        self.remote.as_ref().map(|r| r.describe())
    }

    /// Empty snapshot for the configured categories, stamped now.
    #[must_use]
    pub fn fresh(&self) -> Snapshot {
        Snapshot::fresh(&self.categories)
    }

    // -----------------------------------------------------------------------
    // load / save
    // -----------------------------------------------------------------------

    /// Load the current snapshot.
    ///
    /// Remote first. A missing remote document yields a fresh snapshot; any
    /// other remote failure, including a malformed document, falls back to
    /// the local file, and a missing local file yields a fresh snapshot.
    ///
    /// # Errors
    ///
    /// Only local problems surface: an unreadable or malformed local file.
    pub fn load(&self) -> Result<Snapshot, RepositoryError> {
        if let Some(remote) = &self.remote {
            match remote.fetch() {
                Ok(document) => match self.decode(document, "remote") {
                    Ok(snapshot) => {
                        debug!(source = %remote.describe(), "state loaded from remote");
                        return Ok(snapshot);
                    }
                    Err(err) => warn!(error = %err, "remote state unusable; falling back to local file"),
                },
                Err(RemoteError::NotFound) => {
                    info!(source = %remote.describe(), "remote state not found; starting fresh");
                    return Ok(self.fresh());
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        code = %err.code(),
                        "remote state unavailable; falling back to local file"
                    );
                }
            }
        }

        Ok(self.local_snapshot()?.unwrap_or_else(|| self.fresh()))
    }

    /// Stamp `last_updated` and persist: remote first, local on failure.
    pub fn save(&self, snapshot: &mut Snapshot) -> SaveOutcome {
        snapshot.touch();

        let reason = match &self.remote {
            Some(remote) => match remote.store(&snapshot.to_document()) {
                Ok(()) => return SaveOutcome::Remote,
                Err(err) => {
                    warn!(error = %err, "remote save failed; writing local file instead");
                    err.to_string()
                }
            },
            None => "remote store not configured".to_string(),
        };

        match self.write_local(snapshot) {
            Ok(()) => SaveOutcome::Local { reason },
            Err(err) => {
                warn!(error = %err, "local save failed; state not persisted");
                SaveOutcome::Unsaved {
                    reason: format!("{reason}; {err}"),
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Raw access for sync and validation
    // -----------------------------------------------------------------------

    /// The local document as stored, `None` when the file does not exist.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Read`] or [`RepositoryError::Json`].
    pub fn read_local_document(&self) -> Result<Option<Value>, RepositoryError> {
        let content = match fs::read_to_string(&self.local_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(RepositoryError::Read {
                    path: self.local_path.clone(),
                    source,
                });
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| RepositoryError::Json {
                path: self.local_path.clone(),
                source,
            })
    }

    /// The remote document as stored, `None` when it does not exist or no
    /// remote is configured.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Remote`] for failures other than not-found.
    pub fn read_remote_document(&self) -> Result<Option<Value>, RepositoryError> {
        let Some(remote) = &self.remote else {
            return Ok(None);
        };
        match remote.fetch() {
            Ok(document) => Ok(Some(document)),
            Err(RemoteError::NotFound) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Migrated local snapshot, if the file exists.
    ///
    /// # Errors
    ///
    /// Read, JSON or schema errors.
    pub fn local_snapshot(&self) -> Result<Option<Snapshot>, RepositoryError> {
        self.read_local_document()?
            .map(|doc| self.decode(doc, "local"))
            .transpose()
    }

    /// Migrated remote snapshot, if it exists.
    ///
    /// # Errors
    ///
    /// Remote or schema errors.
    pub fn remote_snapshot(&self) -> Result<Option<Snapshot>, RepositoryError> {
        self.read_remote_document()?
            .map(|doc| self.decode(doc, "remote"))
            .transpose()
    }

    /// Rewrite the local file through a temp file and rename.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Write`] when the directory, temp file or rename
    /// fails.
    pub fn write_local(&self, snapshot: &Snapshot) -> Result<(), RepositoryError> {
        let write_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| RepositoryError::Write { path, source }
        };

        if let Some(parent) = self.local_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(write_err(parent))?;
        }

        let mut body = serde_json::to_string_pretty(&snapshot.to_document()).map_err(|e| {
            RepositoryError::Write {
                path: self.local_path.clone(),
                source: std::io::Error::other(e),
            }
        })?;
        body.push('\n');

        let tmp = self.local_path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(write_err(&tmp))?;
        fs::rename(&tmp, &self.local_path).map_err(write_err(&self.local_path))?;

        info!(path = %self.local_path.display(), "local state written");
        Ok(())
    }

    /// Replace the remote document.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::RemoteNotConfigured`] or the remote failure.
    pub fn write_remote(&self, snapshot: &Snapshot) -> Result<(), RepositoryError> {
        let remote = self
            .remote
            .as_ref()
            .ok_or(RepositoryError::RemoteNotConfigured)?;
        remote.store(&snapshot.to_document())?;
        Ok(())
    }

    /// Copy the local file to its backup sibling.
    ///
    /// Returns the backup path, or `None` when there was no local file.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Write`] when the copy fails.
    pub fn backup_local(&self) -> Result<Option<PathBuf>, RepositoryError> {
        if !self.local_path.exists() {
            return Ok(None);
        }
        let backup = self.backup_path();
        fs::copy(&self.local_path, &backup).map_err(|source| RepositoryError::Write {
            path: backup.clone(),
            source,
        })?;
        info!(path = %backup.display(), "local state backed up");
        Ok(Some(backup))
    }

    fn decode(&self, document: Value, origin: &'static str) -> Result<Snapshot, RepositoryError> {
        Snapshot::from_document(document, &self.categories)
            .map_err(|source| RepositoryError::Schema { origin, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryStore;
    use serde_json::json;
    use tempfile::TempDir;

    fn cats() -> Vec<Category> {
        vec![Category::new("spells", "spell"), Category::new("potions", "potion")]
    }

    fn repo(dir: &TempDir, remote: Option<&MemoryStore>) -> StateRepository {
        StateRepository::new(
            dir.path().join("data/glossary_state.json"),
            cats(),
            remote.map(|r| Box::new(r.clone()) as Box<dyn RemoteStore>),
        )
    }

    fn doc(posted: &[&str], updated: &str) -> Value {
        json!({
            "posted_spells": posted,
            "last_spell_posted": null,
            "cycle_count": {"spells": 1},
            "last_updated": updated
        })
    }

    #[test]
    fn backup_sits_next_to_state_file() {
        let dir = TempDir::new().expect("tmp");
        assert_eq!(
            repo(&dir, None).backup_path(),
            dir.path().join("data/glossary_state.backup.json")
        );
    }

    #[test]
    fn load_prefers_remote() {
        let dir = TempDir::new().expect("tmp");
        let store = MemoryStore::new(Some(doc(&["remote"], "2025-02-01T00:00:00Z")));
        let repo = repo(&dir, Some(&store));
        repo.write_local(&Snapshot::from_document(doc(&["local"], "x"), &cats()).expect("snap"))
            .expect("write local");

        let snap = repo.load().expect("load");
        assert!(snap.category("spells").expect("spells").posted.contains("remote"));
        assert!(snap.category("potions").is_some(), "migrated on load");
    }

    #[test]
    fn load_missing_remote_is_fresh() {
        let dir = TempDir::new().expect("tmp");
        let store = MemoryStore::new(None);
        let snap = repo(&dir, Some(&store)).load().expect("load");
        assert!(snap.categories.values().all(|c| c.posted.is_empty()));
        assert!(!snap.last_updated.is_empty());
    }

    #[test]
    fn load_falls_back_to_local_on_remote_failure() {
        let dir = TempDir::new().expect("tmp");
        let store = MemoryStore::new(Some(doc(&["remote"], "r")));
        store.fail_with(Some(RemoteError::Auth { status: 401 }));
        let repo = repo(&dir, Some(&store));
        repo.write_local(&Snapshot::from_document(doc(&["local"], "l"), &cats()).expect("snap"))
            .expect("write local");

        let snap = repo.load().expect("load");
        assert!(snap.category("spells").expect("spells").posted.contains("local"));
    }

    #[test]
    fn load_with_nothing_anywhere_is_fresh() {
        let dir = TempDir::new().expect("tmp");
        let store = MemoryStore::new(None);
        store.fail_with(Some(RemoteError::timeout("10s")));
        let snap = repo(&dir, Some(&store)).load().expect("load");
        assert_eq!(snap.categories.len(), 2);
    }

    #[test]
    fn corrupt_local_file_is_reported() {
        let dir = TempDir::new().expect("tmp");
        let repo = repo(&dir, None);
        fs::create_dir_all(dir.path().join("data")).expect("mkdir");
        fs::write(repo.local_path(), "{not json").expect("write");
        assert!(matches!(repo.load(), Err(RepositoryError::Json { .. })));
    }

    #[test]
    fn save_goes_remote_then_local() {
        let dir = TempDir::new().expect("tmp");
        let store = MemoryStore::new(None);
        let repo = repo(&dir, Some(&store));
        let mut snap = repo.fresh();
        snap.last_updated = "old".into();

        assert_eq!(repo.save(&mut snap), SaveOutcome::Remote);
        assert_ne!(snap.last_updated, "old");
        assert_eq!(store.document().expect("stored")["last_updated"], json!(snap.last_updated));
        assert!(!repo.local_path().exists(), "remote success does not touch the local file");

        store.fail_with(Some(RemoteError::Server { status: 503 }));
        let outcome = repo.save(&mut snap);
        assert!(matches!(outcome, SaveOutcome::Local { ref reason } if reason.contains("503")));
        assert!(repo.local_path().exists());
    }

    #[test]
    fn save_without_remote_is_local() {
        let dir = TempDir::new().expect("tmp");
        let repo = repo(&dir, None);
        let mut snap = repo.fresh();
        let outcome = repo.save(&mut snap);
        assert!(matches!(outcome, SaveOutcome::Local { .. }));
        assert!(outcome.is_saved());

        let written = repo.local_snapshot().expect("read").expect("exists");
        assert_eq!(written, snap);
    }

    #[test]
    fn unwritable_local_is_unsaved() {
        let dir = TempDir::new().expect("tmp");
        // A regular file where the data directory should be.
        fs::write(dir.path().join("data"), "blocker").expect("write");
        let repo = repo(&dir, None);
        let mut snap = repo.fresh();
        let outcome = repo.save(&mut snap);
        assert!(matches!(outcome, SaveOutcome::Unsaved { .. }));
        assert!(!outcome.is_saved());
    }

    #[test]
    fn backup_copies_existing_file_only() {
        let dir = TempDir::new().expect("tmp");
        let repo = repo(&dir, None);
        assert_eq!(repo.backup_local().expect("no file is fine"), None);

        repo.write_local(&repo.fresh()).expect("write");
        let backup = repo.backup_local().expect("backup").expect("path");
        assert_eq!(
            fs::read_to_string(&backup).expect("backup"),
            fs::read_to_string(repo.local_path()).expect("state")
        );
    }

    #[test]
    fn local_file_is_pretty_and_sorted() {
        let dir = TempDir::new().expect("tmp");
        let repo = repo(&dir, None);
        repo.write_local(&repo.fresh()).expect("write");
        let text = fs::read_to_string(repo.local_path()).expect("read");
        assert!(text.starts_with("{\n  \"cycle_count\""));
        assert!(text.ends_with("}\n"));
    }

    #[test]
    fn raw_remote_reads() {
        let dir = TempDir::new().expect("tmp");
        assert_eq!(repo(&dir, None).read_remote_document().expect("none"), None);

        let store = MemoryStore::new(None);
        let repo = repo(&dir, Some(&store));
        assert_eq!(repo.read_remote_document().expect("missing"), None);

        store.fail_with(Some(RemoteError::network("down")));
        assert!(matches!(
            repo.read_remote_document(),
            Err(RepositoryError::Remote(RemoteError::Network { .. }))
        ));
        assert!(matches!(
            StateRepository::new(dir.path().join("s.json"), cats(), None).write_remote(&repo.fresh()),
            Err(RepositoryError::RemoteNotConfigured)
        ));
    }
}
