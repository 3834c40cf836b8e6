//! Object store over a bare git repository (`bunsen.git`).
//!
//! Commit ids produced here are real git SHA-1s, so a testrun's
//! `bunsen_commit_id` can be inspected with stock git tooling.

use std::collections::BTreeMap;
use std::path::Path;

use git2::{ObjectType, Oid, Repository, Signature, Time, TreeWalkMode, TreeWalkResult};
use tracing::debug;

use crate::{CommitInfo, Id, ObjectStore, Result, StoreError, TreeEntry};

/// Fixed identity for every commit the engine writes. Determinism of the
/// commit id under identical inputs requires a constant author.
const IDENT_NAME: &str = "bunsen";
const IDENT_EMAIL: &str = "bunsen@local";

pub struct GitStore {
    repo: Repository,
}

fn store_err(err: git2::Error) -> StoreError {
    match err.code() {
        git2::ErrorCode::NotFound => StoreError::NotFound(err.message().to_string()),
        _ => StoreError::Io(err.message().to_string()),
    }
}

fn parse_oid(id: &Id) -> Result<Oid> {
    Oid::from_str(id).map_err(|_| StoreError::NotFound(format!("bad object id '{id}'")))
}

fn ref_name(branch: &str) -> String {
    format!("refs/heads/{branch}")
}

/// Nested tree under construction: blobs at this level plus subtrees.
#[derive(Default)]
struct TreeNode {
    blobs: BTreeMap<String, Oid>,
    children: BTreeMap<String, TreeNode>,
}

impl TreeNode {
    fn insert(&mut self, path: &str, id: Oid) -> Result<()> {
        match path.split_once('/') {
            None => {
                if path.is_empty() {
                    return Err(StoreError::Io("empty tree entry name".into()));
                }
                self.blobs.insert(path.to_string(), id);
            }
            Some((dir, rest)) => {
                self.children.entry(dir.to_string()).or_default().insert(rest, id)?;
            }
        }
        Ok(())
    }

    fn write(&self, repo: &Repository) -> Result<Oid> {
        let mut builder = repo.treebuilder(None).map_err(store_err)?;
        for (name, node) in &self.children {
            let sub = node.write(repo)?;
            builder
                .insert(name, sub, 0o040000)
                .map_err(store_err)?;
        }
        for (name, oid) in &self.blobs {
            builder
                .insert(name, *oid, 0o100644)
                .map_err(store_err)?;
        }
        builder.write().map_err(store_err)
    }
}

impl GitStore {
    /// Create a new bare repository at `path`.
    pub fn init_bare(path: &Path) -> Result<Self> {
        let repo = Repository::init_bare(path).map_err(store_err)?;
        debug!(path = %path.display(), "initialized bare object store");
        Ok(GitStore { repo })
    }

    /// Open an existing bare repository.
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::open(path).map_err(store_err)?;
        if !repo.is_bare() {
            return Err(StoreError::Io(format!(
                "{} is not a bare repository",
                path.display()
            )));
        }
        Ok(GitStore { repo })
    }

    fn find_tree_of(&self, commit: &Id) -> Result<git2::Tree<'_>> {
        let commit = self
            .repo
            .find_commit(parse_oid(commit)?)
            .map_err(store_err)?;
        commit.tree().map_err(store_err)
    }

    fn info_for(&self, oid: Oid) -> Result<CommitInfo> {
        let commit = self.repo.find_commit(oid).map_err(store_err)?;
        Ok(CommitInfo {
            id: oid.to_string(),
            tree: commit.tree_id().to_string(),
            parents: commit.parent_ids().map(|p| p.to_string()).collect(),
            message: commit.message().unwrap_or_default().to_string(),
        })
    }
}

impl ObjectStore for GitStore {
    fn put_blob(&self, bytes: &[u8]) -> Result<Id> {
        Ok(self.repo.blob(bytes).map_err(store_err)?.to_string())
    }

    fn put_tree(&self, entries: &[TreeEntry]) -> Result<Id> {
        let mut root = TreeNode::default();
        for entry in entries {
            root.insert(&entry.path, parse_oid(&entry.id)?)?;
        }
        Ok(root.write(&self.repo)?.to_string())
    }

    fn make_commit(
        &self,
        tree: &Id,
        parents: &[Id],
        time_secs: i64,
        message: &str,
    ) -> Result<Id> {
        let tree = self
            .repo
            .find_tree(parse_oid(tree)?)
            .map_err(store_err)?;
        let parent_commits = parents
            .iter()
            .map(|p| self.repo.find_commit(parse_oid(p)?).map_err(store_err))
            .collect::<Result<Vec<_>>>()?;
        let parent_refs: Vec<&git2::Commit<'_>> = parent_commits.iter().collect();
        let sig = Signature::new(IDENT_NAME, IDENT_EMAIL, &Time::new(time_secs, 0))
            .map_err(store_err)?;
        let oid = self
            .repo
            .commit(None, &sig, &sig, message, &tree, &parent_refs)
            .map_err(store_err)?;
        Ok(oid.to_string())
    }

    fn resolve_ref(&self, name: &str) -> Result<Option<Id>> {
        match self.repo.find_reference(&ref_name(name)) {
            Ok(reference) => Ok(reference.target().map(|oid| oid.to_string())),
            Err(err) if err.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(err) => Err(store_err(err)),
        }
    }

    fn update_ref(&self, name: &str, expected: Option<&Id>, new: &Id) -> Result<()> {
        let refname = ref_name(name);
        let new_oid = parse_oid(new)?;
        let conflict = |_| StoreError::RefConflict {
            name: name.to_string(),
        };
        match expected {
            None => {
                // force=false: creation fails if the ref already exists.
                self.repo
                    .reference(&refname, new_oid, false, "bunsen: create branch")
                    .map_err(conflict)?;
            }
            Some(old) => {
                let old_oid = parse_oid(old)?;
                self.repo
                    .reference_matching(&refname, new_oid, true, old_oid, "bunsen: advance branch")
                    .map_err(conflict)?;
            }
        }
        Ok(())
    }

    fn read_path(&self, commit: &Id, path: &str) -> Result<Vec<u8>> {
        let tree = self.find_tree_of(commit)?;
        let entry = tree.get_path(Path::new(path)).map_err(store_err)?;
        let object = entry.to_object(&self.repo).map_err(store_err)?;
        let blob = object
            .as_blob()
            .ok_or_else(|| StoreError::NotFound(format!("{path} is not a blob")))?;
        Ok(blob.content().to_vec())
    }

    fn read_tree(&self, commit: &Id) -> Result<Vec<TreeEntry>> {
        let tree = self.find_tree_of(commit)?;
        let mut entries = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    entries.push(TreeEntry {
                        path: format!("{root}{name}"),
                        id: entry.id().to_string(),
                    });
                }
            }
            TreeWalkResult::Ok
        })
        .map_err(store_err)?;
        Ok(entries)
    }

    fn commit_info(&self, commit: &Id) -> Result<CommitInfo> {
        self.info_for(parse_oid(commit)?)
    }

    fn ref_names(&self) -> Result<Vec<String>> {
        let branches = self
            .repo
            .branches(Some(git2::BranchType::Local))
            .map_err(store_err)?;
        let mut names = Vec::new();
        for branch in branches {
            let (branch, _) = branch.map_err(store_err)?;
            if let Some(name) = branch.name().map_err(store_err)? {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn history(&self, tip: &Id) -> Result<Vec<CommitInfo>> {
        let mut walk = self.repo.revwalk().map_err(store_err)?;
        walk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::TIME)
            .map_err(store_err)?;
        walk.push(parse_oid(tip)?).map_err(store_err)?;
        let mut commits = Vec::new();
        for oid in walk {
            commits.push(self.info_for(oid.map_err(store_err)?)?);
        }
        Ok(commits)
    }
}
