//! View maintenance: per-month summary files on the `index` branch and
//! per-run full-testrun files on `<project>/testruns-...` branches.
//!
//! Every update is a read-modify-write of one file, committed on top of
//! the observed tip and CAS-advanced. Changes are keyed by
//! `bunsen_commit_id`, so retries after a lost CAS converge.

use bunsen_model::{branch, canonical_json, BranchKind, BranchName, Testrun, INDEX_BRANCH};
use bunsen_store::{Id, ObjectStore, StoreError, TreeEntry};
use tracing::{debug, warn};

use crate::{BunsenError, Result};

/// Bounded retry for CAS-advancing a ref. With the repo lock held, a
/// lost race means some writer is not honoring the lock; give up after
/// a few attempts rather than spin.
pub(crate) const MAX_REF_RETRIES: usize = 3;

/// Read `file_name` from the tip of `branch`, if both exist.
pub(crate) fn read_branch_file(
    store: &dyn ObjectStore,
    branch: &str,
    file_name: &str,
) -> Result<Option<Vec<u8>>> {
    let Some(tip) = store.resolve_ref(branch)? else {
        return Ok(None);
    };
    match store.read_path(&tip, file_name) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Commit a single-file change on `branch`, keeping all sibling entries,
/// creating the branch if needed.
pub(crate) fn commit_file(
    store: &dyn ObjectStore,
    branch: &str,
    file_name: &str,
    contents: &[u8],
    message: &str,
    time_secs: i64,
) -> Result<()> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let tip = store.resolve_ref(branch)?;
        let mut entries: Vec<TreeEntry> = match &tip {
            Some(tip) => store
                .read_tree(tip)?
                .into_iter()
                .filter(|e| e.path != file_name)
                .collect(),
            None => Vec::new(),
        };
        entries.push(TreeEntry {
            path: file_name.to_string(),
            id: store.put_blob(contents)?,
        });
        let tree = store.put_tree(&entries)?;
        let parents: Vec<Id> = tip.iter().cloned().collect();
        let commit = store.make_commit(&tree, &parents, time_secs, message)?;
        match store.update_ref(branch, tip.as_ref(), &commit) {
            Ok(()) => return Ok(()),
            Err(StoreError::RefConflict { .. }) if attempt < MAX_REF_RETRIES => {
                debug!(branch, attempt, "ref moved under us, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Write (or replace) the full-testrun file for `run` on its testruns
/// branch.
pub(crate) fn write_full_testrun(
    store: &dyn ObjectStore,
    run: &Testrun,
    time_secs: i64,
) -> Result<()> {
    let branch_name = run
        .bunsen_testruns_branch
        .clone()
        .ok_or_else(|| BunsenError::NotFound("testrun has no testruns branch".into()))?;
    let parsed: BranchName = branch_name
        .parse()
        .map_err(BunsenError::ValidationFailed)?;
    let id = run
        .bunsen_commit_id
        .clone()
        .ok_or_else(|| BunsenError::NotFound("testrun has no bunsen_commit_id".into()))?;
    let file_name = branch::testrun_file_name(&parsed.project, &id);

    let updating = read_branch_file(store, &branch_name, &file_name)?.is_some();
    let message = format!(
        "{branch_name}: {}index file for commit {id}",
        if updating { "updating " } else { "" }
    );
    let contents = canonical_json(run).map_err(BunsenError::ValidationFailed)?;
    commit_file(
        store,
        &branch_name,
        &file_name,
        contents.as_bytes(),
        &message,
        time_secs,
    )
}

/// Append or replace `summary` in its `<project>-YYYY-MM.json` index
/// file. Returns true when an existing entry was replaced.
pub(crate) fn update_index_entry(
    store: &dyn ObjectStore,
    project: &str,
    year_month: &str,
    summary: &Testrun,
    time_secs: i64,
) -> Result<bool> {
    let id = summary
        .bunsen_commit_id
        .clone()
        .ok_or_else(|| BunsenError::NotFound("summary has no bunsen_commit_id".into()))?;
    let file_name = branch::index_file_name(project, year_month);
    let message = format!("update {file_name} for {id}");

    let mut attempt = 0;
    loop {
        attempt += 1;
        let tip = store.resolve_ref(INDEX_BRANCH)?;
        let mut entries: Vec<Testrun> = Vec::new();
        let mut siblings: Vec<TreeEntry> = Vec::new();
        if let Some(tip) = &tip {
            for entry in store.read_tree(tip)? {
                if entry.path == file_name {
                    let bytes = store.read_path(tip, &entry.path)?;
                    entries = serde_json::from_slice(&bytes)
                        .map_err(|e| BunsenError::ValidationFailed(e.into()))?;
                } else {
                    siblings.push(entry);
                }
            }
        }

        let mut replaced = false;
        match entries
            .iter_mut()
            .find(|e| e.bunsen_commit_id.as_deref() == Some(id.as_str()))
        {
            Some(existing) => {
                replaced = true;
                *existing = summary.clone();
            }
            None => entries.push(summary.clone()),
        }

        let contents = canonical_json(&entries).map_err(BunsenError::ValidationFailed)?;
        siblings.push(TreeEntry {
            path: file_name.clone(),
            id: store.put_blob(contents.as_bytes())?,
        });
        let tree = store.put_tree(&siblings)?;
        let parents: Vec<Id> = tip.iter().cloned().collect();
        let commit = store.make_commit(&tree, &parents, time_secs, &message)?;
        match store.update_ref(INDEX_BRANCH, tip.as_ref(), &commit) {
            Ok(()) => return Ok(replaced),
            Err(StoreError::RefConflict { .. }) if attempt < MAX_REF_RETRIES => {
                debug!(attempt, "index branch moved under us, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// All entries of one index file, in insertion order.
pub(crate) fn read_index_entries(
    store: &dyn ObjectStore,
    project: &str,
    year_month: &str,
) -> Result<Vec<Testrun>> {
    let file_name = branch::index_file_name(project, year_month);
    match read_branch_file(store, INDEX_BRANCH, &file_name)? {
        Some(bytes) => {
            serde_json::from_slice(&bytes).map_err(|e| BunsenError::ValidationFailed(e.into()))
        }
        None => Ok(Vec::new()),
    }
}

/// Locate the full-testrun file for `id` across all of `project`'s
/// testruns branches. No two branches may hold a file for the same id,
/// so the first (and only) match wins; duplicates are reported.
pub(crate) fn find_full_testrun(
    store: &dyn ObjectStore,
    project: &str,
    id: &str,
) -> Result<Option<(String, Vec<u8>)>> {
    let file_name = branch::testrun_file_name(project, id);
    let mut found: Option<(String, Vec<u8>)> = None;
    for ref_name in store.ref_names()? {
        let Ok(parsed) = ref_name.parse::<BranchName>() else {
            continue;
        };
        if parsed.kind != BranchKind::Testruns || parsed.project != project {
            continue;
        }
        if let Some(bytes) = read_branch_file(store, &ref_name, &file_name)? {
            if let Some((first, _)) = &found {
                warn!(
                    id,
                    first_branch = %first,
                    duplicate_branch = %ref_name,
                    "full testrun stored on multiple branches"
                );
            } else {
                found = Some((ref_name, bytes));
            }
        }
    }
    Ok(found)
}
