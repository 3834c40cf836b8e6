//! Content-addressed object store backing a Bunsen repo.
//!
//! All three views of a testrun (raw-log branches, the summary index
//! branch, and the full-testrun branches) live in one underlying DAG
//! store. This crate defines the capability set the engine needs from
//! that store and provides two implementations: `GitStore` over a bare
//! git repository, and `MemoryStore` for tests.

use thiserror::Error;

/// Git-backed store for production.
pub mod git;

/// In-memory store for testing.
pub mod memory;

pub use git::GitStore;
pub use memory::MemoryStore;

/// A 40-hex content address.
pub type Id = String;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object store I/O error: {0}")]
    Io(String),

    #[error("ref '{name}' was updated concurrently")]
    RefConflict { name: String },

    #[error("not found in object store: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A blob entry in a (possibly nested) tree, addressed by its full path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub id: Id,
}

/// Metadata of a stored commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: Id,
    pub tree: Id,
    pub parents: Vec<Id>,
    pub message: String,
}

/// Capability set required from the underlying content-addressed store.
///
/// All mutation goes through `update_ref`; there are no non-atomic
/// multi-ref updates. Commit ids are deterministic functions of their
/// inputs, which is what makes deduplication by re-commit possible.
pub trait ObjectStore {
    /// Store a blob, returning its content address.
    fn put_blob(&self, bytes: &[u8]) -> Result<Id>;

    /// Store a tree of blobs. Entry paths may contain `/`, producing
    /// nested trees. Returns the root tree's content address.
    fn put_tree(&self, entries: &[TreeEntry]) -> Result<Id>;

    /// Create a commit with the fixed engine identity and the given
    /// timestamp (seconds since epoch, rounded; 0 when unknown).
    fn make_commit(
        &self,
        tree: &Id,
        parents: &[Id],
        time_secs: i64,
        message: &str,
    ) -> Result<Id>;

    /// Current tip of a branch, or `None` if the branch does not exist.
    fn resolve_ref(&self, name: &str) -> Result<Option<Id>>;

    /// Compare-and-set branch update. `expected` is the tip observed by
    /// the caller (`None` to create the branch). Fails with
    /// `RefConflict` when the branch moved in between.
    fn update_ref(&self, name: &str, expected: Option<&Id>, new: &Id) -> Result<()>;

    /// Read the blob at `path` under the given commit's tree.
    fn read_path(&self, commit: &Id, path: &str) -> Result<Vec<u8>>;

    /// All blob entries under the given commit's tree, with full paths.
    fn read_tree(&self, commit: &Id) -> Result<Vec<TreeEntry>>;

    fn commit_info(&self, commit: &Id) -> Result<CommitInfo>;

    /// Names of all branches in the store.
    fn ref_names(&self) -> Result<Vec<String>>;

    /// Commits reachable from `tip`, newest first.
    fn history(&self, tip: &Id) -> Result<Vec<CommitInfo>>;
}
