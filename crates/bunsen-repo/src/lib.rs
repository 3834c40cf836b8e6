//! Bunsen repository engine.
//!
//! A Bunsen repo packs testsuite log bundles into a content-addressed
//! store (`bunsen.git`) and keeps three parallel views consistent:
//! raw logs on `<project>/testlogs-YYYY-MM` branches, full testrun JSON
//! on `<project>/testruns-YYYY-MM[-extra]` branches, and per-month
//! summary files on the single `index` branch.

use std::path::{Path, PathBuf};

use bunsen_model::{ModelError, INDEX_BRANCH};
use bunsen_parse::{ParseError, Registry};
use bunsen_store::{GitStore, ObjectStore, StoreError, TreeEntry};
use thiserror::Error;
use tracing::info;

pub mod bundle;
pub mod config;
pub mod ingest;
pub mod lock;
pub mod query;
pub mod repair;

mod index;

pub use config::RepoConfig;
pub use ingest::{IngestCase, IngestOutcome};
pub use lock::WriteLock;
pub use repair::RepairReport;

/// Directory of the bare object store inside a repo.
pub const GIT_DIR: &str = "bunsen.git";

/// Layout-version file at the root of the `index` branch tree.
pub const FORMAT_FILE: &str = "_bunsen_format";

/// Layout version written by this engine. Mutation of repos with a
/// higher version is refused.
pub const FORMAT_VERSION: u64 = 1;

/// Engine version recorded in every testrun it stores.
pub const BUNSEN_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Stable error-kind tags; the CLI maps these to exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    StoreIo,
    RefConflict,
    ParseRejected,
    ValidationFailed,
    AmbiguousId,
    AmbiguousScript,
    NotFound,
    LockHeld,
    BadConfig,
}

#[derive(Debug, Error)]
pub enum BunsenError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse rejected: {0}")]
    ParseRejected(String),

    #[error("validation failed: {0}")]
    ValidationFailed(#[from] ModelError),

    #[error("id prefix '{prefix}' matches multiple testruns: {candidates:?}")]
    AmbiguousId {
        prefix: String,
        candidates: Vec<String>,
    },

    #[error("script name '{name}' is ambiguous: {candidates:?}")]
    AmbiguousScript {
        name: String,
        candidates: Vec<String>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("another writer holds the repo lock")]
    LockHeld,

    #[error("bad configuration: {0}")]
    BadConfig(String),

    /// The testlogs ref advanced but a later view update failed. The
    /// repo is readable; `repair` completes the remaining views, and
    /// re-ingesting the same bundle is always safe.
    #[error("ingest of {id} incomplete ({reason}); run repair")]
    Incomplete { id: String, reason: String },
}

impl BunsenError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BunsenError::Store(StoreError::RefConflict { .. }) => ErrorKind::RefConflict,
            BunsenError::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            BunsenError::Store(StoreError::Io(_)) => ErrorKind::StoreIo,
            BunsenError::Io(_) => ErrorKind::StoreIo,
            BunsenError::ParseRejected(_) => ErrorKind::ParseRejected,
            BunsenError::ValidationFailed(_) => ErrorKind::ValidationFailed,
            BunsenError::AmbiguousId { .. } => ErrorKind::AmbiguousId,
            BunsenError::AmbiguousScript { .. } => ErrorKind::AmbiguousScript,
            BunsenError::NotFound(_) => ErrorKind::NotFound,
            BunsenError::LockHeld => ErrorKind::LockHeld,
            BunsenError::BadConfig(_) => ErrorKind::BadConfig,
            BunsenError::Incomplete { .. } => ErrorKind::StoreIo,
        }
    }
}

impl From<ParseError> for BunsenError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Rejected(msg) => BunsenError::ParseRejected(msg),
            ParseError::UnknownModule(name) => {
                BunsenError::BadConfig(format!("unknown commit_module '{name}'"))
            }
            ParseError::AmbiguousScript { name, candidates } => {
                BunsenError::AmbiguousScript { name, candidates }
            }
            ParseError::Discovery(msg) => BunsenError::BadConfig(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, BunsenError>;

/// An opened Bunsen repository.
pub struct Bunsen {
    base_dir: PathBuf,
    store: Box<dyn ObjectStore>,
    config: RepoConfig,
    registry: Registry,
}

impl Bunsen {
    /// Create an empty Bunsen repo at `base_dir`.
    ///
    /// Lays out the bare store, an empty `config`, the `cache/` and
    /// `scripts/` directories, and an initial commit on `index` carrying
    /// the layout-version file.
    pub fn init(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        let store = GitStore::init_bare(&base_dir.join(GIT_DIR))?;

        let config_path = base_dir.join("config");
        if !config_path.exists() {
            std::fs::write(&config_path, "")?;
        }
        std::fs::create_dir_all(base_dir.join("cache"))?;
        std::fs::create_dir_all(base_dir.join("scripts"))?;

        // Re-initializing an existing repo keeps whatever is already
        // configured there.
        let config = RepoConfig::load(&config_path)?;
        let repo = Bunsen {
            base_dir: base_dir.to_path_buf(),
            store: Box::new(store),
            config,
            registry: Registry::builtin(),
        };
        repo.ensure_index_branch()?;
        info!(path = %base_dir.display(), "initialized Bunsen repo");
        Ok(repo)
    }

    /// Open an existing Bunsen repo.
    pub fn open(base_dir: &Path) -> Result<Self> {
        let git_dir = base_dir.join(GIT_DIR);
        if !git_dir.is_dir() {
            return Err(BunsenError::NotFound(format!(
                "{} is not a Bunsen repo (missing {GIT_DIR})",
                base_dir.display()
            )));
        }
        let store = GitStore::open(&git_dir)?;
        let config = RepoConfig::load(&base_dir.join("config"))?;
        let mut registry = Registry::builtin();
        registry.discover(base_dir)?;
        Ok(Bunsen {
            base_dir: base_dir.to_path_buf(),
            store: Box::new(store),
            config,
            registry,
        })
    }

    /// Build a repo over an arbitrary store. Used by tests to run the
    /// engine against the in-memory store.
    pub fn with_store(
        base_dir: &Path,
        store: Box<dyn ObjectStore>,
        config: RepoConfig,
    ) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        let repo = Bunsen {
            base_dir: base_dir.to_path_buf(),
            store,
            config,
            registry: Registry::builtin(),
        };
        repo.ensure_index_branch()?;
        Ok(repo)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    fn ensure_index_branch(&self) -> Result<()> {
        if self.store.resolve_ref(INDEX_BRANCH)?.is_some() {
            return Ok(());
        }
        let format = self
            .store
            .put_blob(format!("{{\"version\":{FORMAT_VERSION}}}").as_bytes())?;
        let tree = self.store.put_tree(&[TreeEntry {
            path: FORMAT_FILE.to_string(),
            id: format,
        }])?;
        let commit = self
            .store
            .make_commit(&tree, &[], 0, "bunsen init: create index")?;
        self.store.update_ref(INDEX_BRANCH, None, &commit)?;
        Ok(())
    }

    /// Refuse to mutate repos written by a newer engine.
    pub(crate) fn check_format(&self) -> Result<()> {
        let Some(tip) = self.store.resolve_ref(INDEX_BRANCH)? else {
            return Ok(());
        };
        let bytes = match self.store.read_path(&tip, FORMAT_FILE) {
            Ok(bytes) => bytes,
            // Pre-versioning repo; treat as version 1.
            Err(StoreError::NotFound(_)) => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| BunsenError::BadConfig(format!("bad {FORMAT_FILE}: {e}")))?;
        let version = value.get("version").and_then(|v| v.as_u64()).unwrap_or(0);
        if version > FORMAT_VERSION {
            return Err(BunsenError::BadConfig(format!(
                "repo layout version {version} is newer than supported {FORMAT_VERSION}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bunsen_store::MemoryStore;

    #[test]
    fn init_creates_layout_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Bunsen::init(dir.path()).unwrap();
        assert!(dir.path().join(GIT_DIR).is_dir());
        assert!(dir.path().join("config").is_file());
        assert!(dir.path().join("cache").is_dir());
        assert!(dir.path().join("scripts").is_dir());

        let tip = repo.store().resolve_ref(INDEX_BRANCH).unwrap().unwrap();
        let format = repo.store().read_path(&tip, FORMAT_FILE).unwrap();
        assert_eq!(format, br#"{"version":1}"#);
        repo.check_format().unwrap();
    }

    #[test]
    fn open_rejects_missing_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Bunsen::open(dir.path()),
            Err(BunsenError::NotFound(_))
        ));
    }

    #[test]
    fn init_then_open_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        Bunsen::init(dir.path()).unwrap();
        let repo = Bunsen::open(dir.path()).unwrap();
        repo.check_format().unwrap();
    }

    #[test]
    fn newer_format_version_refuses_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let format = store.put_blob(br#"{"version":99}"#).unwrap();
        let tree = store
            .put_tree(&[TreeEntry {
                path: FORMAT_FILE.into(),
                id: format,
            }])
            .unwrap();
        let commit = store.make_commit(&tree, &[], 0, "init").unwrap();
        store.update_ref(INDEX_BRANCH, None, &commit).unwrap();

        let repo =
            Bunsen::with_store(dir.path(), Box::new(store), RepoConfig::default()).unwrap();
        assert!(matches!(
            repo.check_format(),
            Err(BunsenError::BadConfig(_))
        ));
    }
}
