//! Maintenance calls: heal partially-ingested testruns and mark runs
//! obsolete.
//!
//! Ingest advances the testlogs ref first, then the testruns and index
//! views. A crash in between leaves a testlogs commit whose summary is
//! recoverable from its commit message; `repair` scans every testlogs
//! branch and rebuilds whatever is missing.

use bunsen_model::{branch, BranchKind, BranchName, Testrun};
use bunsen_store::ObjectStore;
use tracing::{info, warn};

use crate::index::{find_full_testrun, read_index_entries, update_index_entry, write_full_testrun};
use crate::lock::WriteLock;
use crate::{Bunsen, BunsenError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Full-testrun files rebuilt from commit-message summaries.
    pub full_files_rebuilt: usize,
    /// Missing index entries appended.
    pub index_entries_added: usize,
}

impl Bunsen {
    /// Scan all testlogs commits and rebuild missing views.
    pub fn repair(&self) -> Result<RepairReport> {
        let _lock = WriteLock::acquire(self.base_dir())?;
        self.check_format()?;

        let mut report = RepairReport::default();
        for ref_name in self.store().ref_names()? {
            let Ok(parsed) = ref_name.parse::<BranchName>() else {
                continue;
            };
            if parsed.kind != BranchKind::Testlogs {
                continue;
            }
            let Some(tip) = self.store().resolve_ref(&ref_name)? else {
                continue;
            };
            for commit in self.store().history(&tip)? {
                self.repair_commit(&parsed, &commit, &mut report)?;
            }
        }
        info!(
            rebuilt = report.full_files_rebuilt,
            appended = report.index_entries_added,
            "repair finished"
        );
        Ok(report)
    }

    fn repair_commit(
        &self,
        logs_branch: &BranchName,
        commit: &bunsen_store::CommitInfo,
        report: &mut RepairReport,
    ) -> Result<()> {
        let Some(summary_json) = branch::summary_from_commit_message(&commit.message) else {
            warn!(id = %commit.id, "testlogs commit without a summary message");
            return Ok(());
        };
        let mut summary = match Testrun::from_json(summary_json) {
            Ok(summary) => summary,
            Err(err) => {
                warn!(id = %commit.id, %err, "unparseable summary in commit message");
                return Ok(());
            }
        };
        summary.bunsen_commit_id = Some(commit.id.clone());
        if summary.bunsen_testlogs_branch.is_none() {
            summary.bunsen_testlogs_branch = Some(logs_branch.to_string());
        }
        if summary.bunsen_testruns_branch.is_none() {
            warn!(id = %commit.id, "summary names no testruns branch, cannot repair");
            return Ok(());
        }

        let project = &logs_branch.project;
        let year_month = summary
            .year_month
            .clone()
            .unwrap_or_else(|| logs_branch.year_month.clone());
        let time_secs = summary
            .parsed_timestamp()
            .map(|t| t.timestamp())
            .unwrap_or(0);

        if find_full_testrun(self.store(), project, &commit.id)?.is_none() {
            // The testcases are unrecoverable; the rebuilt full file
            // carries the summary fields until the bundle is re-ingested.
            write_full_testrun(self.store(), &summary, time_secs)?;
            report.full_files_rebuilt += 1;
            info!(id = %commit.id, "rebuilt full testrun file");
        }

        let indexed = read_index_entries(self.store(), project, &year_month)?
            .iter()
            .any(|e| e.bunsen_commit_id.as_deref() == Some(commit.id.as_str()));
        if !indexed {
            update_index_entry(self.store(), project, &year_month, &summary, time_secs)?;
            report.index_entries_added += 1;
            info!(id = %commit.id, "appended missing index entry");
        }
        Ok(())
    }

    /// Logically delete a testrun: flip `obsolete` in the stored summary
    /// and full record. Branches and commits are never rewritten.
    pub fn mark_obsolete(&self, id_or_prefix: &str) -> Result<String> {
        let _lock = WriteLock::acquire(self.base_dir())?;
        self.check_format()?;

        let (project, summary) = self.resolve_id(id_or_prefix)?;
        let id = summary
            .bunsen_commit_id
            .clone()
            .ok_or_else(|| BunsenError::NotFound(format!("testrun {id_or_prefix}")))?;

        let Some((_, bytes)) = find_full_testrun(self.store(), &project, &id)? else {
            return Err(BunsenError::NotFound(format!("full testrun for {id}")));
        };
        let mut full = Testrun::from_json(&String::from_utf8_lossy(&bytes))
            .map_err(BunsenError::ValidationFailed)?;
        if full.obsolete {
            return Ok(id);
        }
        full.obsolete = true;

        let year_month = full
            .year_month
            .clone()
            .ok_or_else(|| BunsenError::NotFound(format!("year_month of {id}")))?;
        let time_secs = full
            .parsed_timestamp()
            .map(|t| t.timestamp())
            .unwrap_or(0);
        write_full_testrun(self.store(), &full, time_secs)?;
        update_index_entry(self.store(), &project, &year_month, &full.summary(), time_secs)?;
        info!(id = %id, "marked testrun obsolete");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IngestOutcome, RepoConfig};
    use bunsen_model::canonical_json;
    use bunsen_parse::FileMap;
    use bunsen_store::{MemoryStore, ObjectStore};

    const SUM: &str = "\
Test run by b on Mon Aug  5 10:00:00 2019
PASS: t.exp: works
";

    fn bundle() -> FileMap {
        let mut files = FileMap::new();
        files.insert("t.sum".into(), SUM.as_bytes().to_vec());
        files
    }

    fn test_repo() -> (tempfile::TempDir, Bunsen) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Bunsen::with_store(
            dir.path(),
            Box::new(MemoryStore::new()),
            RepoConfig::default(),
        )
        .unwrap();
        (dir, repo)
    }

    /// Simulate a crash after the testlogs ref advanced: rewind the
    /// index and testruns branches to before the ingest.
    fn ingest_then_lose_views(repo: &Bunsen) -> IngestOutcome {
        let store = repo.store();
        let index_before = store.resolve_ref("index").unwrap().unwrap();
        let out = repo.ingest("gdb", bundle(), None).unwrap();

        let runs_tip = store
            .resolve_ref("gdb/testruns-2019-08")
            .unwrap()
            .unwrap();
        let runs_parent = store.commit_info(&runs_tip).unwrap().parents.first().cloned();
        match runs_parent {
            Some(parent) => store
                .update_ref("gdb/testruns-2019-08", Some(&runs_tip), &parent)
                .unwrap(),
            None => {
                // First commit on the branch: emulate deletion by
                // pointing the ref at an empty-tree commit.
                let tree = store.put_tree(&[]).unwrap();
                let empty = store.make_commit(&tree, &[], 0, "empty").unwrap();
                store
                    .update_ref("gdb/testruns-2019-08", Some(&runs_tip), &empty)
                    .unwrap();
            }
        }

        let index_tip = store.resolve_ref("index").unwrap().unwrap();
        store
            .update_ref("index", Some(&index_tip), &index_before)
            .unwrap();
        out
    }

    #[test]
    fn repair_completes_interrupted_ingest() {
        let (_dir, repo) = test_repo();
        let out = ingest_then_lose_views(&repo);

        // Both views are gone.
        assert!(
            find_full_testrun(repo.store(), "gdb", &out.bunsen_commit_id)
                .unwrap()
                .is_none()
        );
        assert!(read_index_entries(repo.store(), "gdb", "2019-08")
            .unwrap()
            .is_empty());

        let report = repo.repair().unwrap();
        assert_eq!(report.full_files_rebuilt, 1);
        assert_eq!(report.index_entries_added, 1);

        // Views exist again and agree with each other.
        let entries = read_index_entries(repo.store(), "gdb", "2019-08").unwrap();
        assert_eq!(entries.len(), 1);
        let (_, bytes) = find_full_testrun(repo.store(), "gdb", &out.bunsen_commit_id)
            .unwrap()
            .unwrap();
        let full = Testrun::from_json(&String::from_utf8_lossy(&bytes)).unwrap();
        assert_eq!(
            canonical_json(&entries[0]).unwrap(),
            canonical_json(&full.summary()).unwrap()
        );

        // Repair is idempotent.
        let again = repo.repair().unwrap();
        assert_eq!(again, RepairReport::default());
    }

    #[test]
    fn repair_on_healthy_repo_is_a_noop() {
        let (_dir, repo) = test_repo();
        repo.ingest("gdb", bundle(), None).unwrap();
        let report = repo.repair().unwrap();
        assert_eq!(report, RepairReport::default());
    }

    #[test]
    fn mark_obsolete_flips_both_views() {
        let (_dir, repo) = test_repo();
        let out = repo.ingest("gdb", bundle(), None).unwrap();
        let id = repo.mark_obsolete(&out.bunsen_commit_id[..8]).unwrap();
        assert_eq!(id, out.bunsen_commit_id);

        let entries = read_index_entries(repo.store(), "gdb", "2019-08").unwrap();
        assert!(entries[0].obsolete);
        let (_, bytes) = find_full_testrun(repo.store(), "gdb", &id).unwrap().unwrap();
        assert!(Testrun::from_json(&String::from_utf8_lossy(&bytes))
            .unwrap()
            .obsolete);

        // Marking twice is a no-op.
        repo.mark_obsolete(&id).unwrap();
    }
}
