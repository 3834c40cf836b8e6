//! In-memory object store for testing.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use sha2::{Digest, Sha256};

use crate::{CommitInfo, Id, ObjectStore, Result, StoreError, TreeEntry};

#[derive(Debug, Clone)]
enum Object {
    Blob(Vec<u8>),
    /// Flattened tree: full blob path -> blob id.
    Tree(BTreeMap<String, Id>),
    Commit {
        tree: Id,
        parents: Vec<Id>,
        message: String,
    },
}

pub struct MemoryStore {
    objects: RwLock<HashMap<Id, Object>>,
    refs: RwLock<HashMap<String, Id>>,
}

/// 40-hex id from a type-tagged encoding, so blobs, trees, and commits
/// with equal bytes never collide across kinds.
fn content_id(kind: &str, payload: &[u8]) -> Id {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update([0u8]);
    hasher.update(payload);
    hex::encode(&hasher.finalize()[..20])
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            objects: RwLock::new(HashMap::new()),
            refs: RwLock::new(HashMap::new()),
        }
    }

    fn get(&self, id: &Id) -> Result<Object> {
        self.objects
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    fn tree_entries(&self, commit: &Id) -> Result<BTreeMap<String, Id>> {
        let Object::Commit { tree, .. } = self.get(commit)? else {
            return Err(StoreError::NotFound(format!("{commit} is not a commit")));
        };
        let Object::Tree(entries) = self.get(&tree)? else {
            return Err(StoreError::NotFound(format!("{tree} is not a tree")));
        };
        Ok(entries)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for MemoryStore {
    fn put_blob(&self, bytes: &[u8]) -> Result<Id> {
        let id = content_id("blob", bytes);
        self.objects
            .write()
            .unwrap()
            .insert(id.clone(), Object::Blob(bytes.to_vec()));
        Ok(id)
    }

    fn put_tree(&self, entries: &[TreeEntry]) -> Result<Id> {
        let map: BTreeMap<String, Id> = entries
            .iter()
            .map(|e| (e.path.clone(), e.id.clone()))
            .collect();
        let mut payload = Vec::new();
        for (path, id) in &map {
            payload.extend_from_slice(path.as_bytes());
            payload.push(0);
            payload.extend_from_slice(id.as_bytes());
            payload.push(0);
        }
        let id = content_id("tree", &payload);
        self.objects
            .write()
            .unwrap()
            .insert(id.clone(), Object::Tree(map));
        Ok(id)
    }

    fn make_commit(
        &self,
        tree: &Id,
        parents: &[Id],
        time_secs: i64,
        message: &str,
    ) -> Result<Id> {
        if !matches!(self.get(tree)?, Object::Tree(_)) {
            return Err(StoreError::NotFound(format!("{tree} is not a tree")));
        }
        let payload = format!(
            "tree {tree}\nparents {}\ntime {time_secs}\n\n{message}",
            parents.join(",")
        );
        let id = content_id("commit", payload.as_bytes());
        self.objects.write().unwrap().insert(
            id.clone(),
            Object::Commit {
                tree: tree.clone(),
                parents: parents.to_vec(),
                message: message.to_string(),
            },
        );
        Ok(id)
    }

    fn resolve_ref(&self, name: &str) -> Result<Option<Id>> {
        Ok(self.refs.read().unwrap().get(name).cloned())
    }

    fn update_ref(&self, name: &str, expected: Option<&Id>, new: &Id) -> Result<()> {
        let mut refs = self.refs.write().unwrap();
        let current = refs.get(name);
        if current.map(String::as_str) != expected.map(String::as_str) {
            return Err(StoreError::RefConflict {
                name: name.to_string(),
            });
        }
        refs.insert(name.to_string(), new.clone());
        Ok(())
    }

    fn read_path(&self, commit: &Id, path: &str) -> Result<Vec<u8>> {
        let entries = self.tree_entries(commit)?;
        let blob_id = entries
            .get(path)
            .ok_or_else(|| StoreError::NotFound(format!("{path} in {commit}")))?;
        match self.get(blob_id)? {
            Object::Blob(bytes) => Ok(bytes),
            _ => Err(StoreError::NotFound(format!("{path} is not a blob"))),
        }
    }

    fn read_tree(&self, commit: &Id) -> Result<Vec<TreeEntry>> {
        Ok(self
            .tree_entries(commit)?
            .into_iter()
            .map(|(path, id)| TreeEntry { path, id })
            .collect())
    }

    fn commit_info(&self, commit: &Id) -> Result<CommitInfo> {
        match self.get(commit)? {
            Object::Commit {
                tree,
                parents,
                message,
            } => Ok(CommitInfo {
                id: commit.clone(),
                tree,
                parents,
                message,
            }),
            _ => Err(StoreError::NotFound(format!("{commit} is not a commit"))),
        }
    }

    fn ref_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.refs.read().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn history(&self, tip: &Id) -> Result<Vec<CommitInfo>> {
        // Testlogs branches are linear chains, so a first-parent walk
        // covers everything the engine asks of the in-memory store.
        let mut commits = Vec::new();
        let mut next = Some(tip.clone());
        while let Some(id) = next {
            let info = self.commit_info(&id)?;
            next = info.parents.first().cloned();
            commits.push(info);
        }
        Ok(commits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_ids_are_content_addressed() {
        let store = MemoryStore::new();
        let a = store.put_blob(b"abc").unwrap();
        let b = store.put_blob(b"abc").unwrap();
        let c = store.put_blob(b"abd").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 40);
    }

    #[test]
    fn blob_and_tree_ids_do_not_collide() {
        let store = MemoryStore::new();
        let blob = store.put_blob(b"").unwrap();
        let tree = store.put_tree(&[]).unwrap();
        assert_ne!(blob, tree);
    }
}
