//! Ingest engine: from a bundle of log files to a three-view commit.
//!
//! The submitted files become a tree in the object store; the tree's
//! commit id on the project's testlogs branch is the testrun's identity.
//! Re-submitting identical log bytes always resolves to the existing
//! commit, which is what makes ingest idempotent and the store
//! deduplicating.

use std::sync::mpsc;
use std::time::Duration;

use bunsen_model::{branch, canonical_json, BranchName, Testrun};
use bunsen_parse::FileMap;
use bunsen_store::{Id, ObjectStore, StoreError, TreeEntry};
use chrono::{SecondsFormat, TimeZone, Utc};
use tracing::{debug, info, warn};

use crate::config::glob_match;
use crate::index::{find_full_testrun, update_index_entry, write_full_testrun, MAX_REF_RETRIES};
use crate::lock::WriteLock;
use crate::{Bunsen, BunsenError, Result, BUNSEN_VERSION};

/// Upper bound on waiting for the source repo during the timestamp
/// fallback; on expiry the wall clock wins.
const SOURCE_REPO_TIMEOUT: Duration = Duration::from_secs(5);

/// Which of the four ingest cases applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestCase {
    /// New log bytes: testlogs commit created.
    New,
    /// Known log bytes, first testrun record for them.
    DupLogsNewRun,
    /// Known log bytes, changed testrun record: views replaced in place.
    Updated,
    /// Byte-identical re-submission: nothing written.
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub bunsen_commit_id: Id,
    pub case: IngestCase,
}

impl Bunsen {
    /// Ingest a bundle of log files for `project`, parsing it with the
    /// configured `commit_module`.
    ///
    /// Blocks on the repo write lock; see `try_ingest` for the
    /// non-blocking variant.
    pub fn ingest(
        &self,
        project: &str,
        files: FileMap,
        extra_label: Option<&str>,
    ) -> Result<IngestOutcome> {
        let lock = WriteLock::acquire(self.base_dir())?;
        self.ingest_with(project, files, None, extra_label, lock)
    }

    /// Like `ingest`, but fails with `LockHeld` instead of waiting for
    /// another writer.
    pub fn try_ingest(
        &self,
        project: &str,
        files: FileMap,
        extra_label: Option<&str>,
    ) -> Result<IngestOutcome> {
        let lock = WriteLock::try_acquire(self.base_dir())?;
        self.ingest_with(project, files, None, extra_label, lock)
    }

    /// Ingest with an already-parsed testrun record.
    ///
    /// Re-submitting identical log bytes with a corrected record is how
    /// stored metadata is updated in place.
    pub fn ingest_parsed(
        &self,
        project: &str,
        files: FileMap,
        run: Testrun,
        extra_label: Option<&str>,
    ) -> Result<IngestOutcome> {
        let lock = WriteLock::acquire(self.base_dir())?;
        self.ingest_with(project, files, Some(run), extra_label, lock)
    }

    fn ingest_with(
        &self,
        project: &str,
        files: FileMap,
        parsed: Option<Testrun>,
        extra_label: Option<&str>,
        _lock: WriteLock,
    ) -> Result<IngestOutcome> {
        branch::validate_project(project).map_err(BunsenError::ValidationFailed)?;
        self.check_format()?;

        let files = filter_manifest(files, &self.config().manifest);

        let (mut run, files, parser_label) = match parsed {
            Some(run) => (run, files, None),
            None => {
                let module = self
                    .config()
                    .commit_module
                    .as_deref()
                    .unwrap_or("dejagnu.commit_logs");
                let parser = self.registry().resolve(module)?;
                let out = parser.parse(&files)?;
                (out.testrun, out.files, out.extra_label)
            }
        };
        if files.is_empty() {
            return Err(BunsenError::ParseRejected(
                "no log files left to store".into(),
            ));
        }

        // A record with neither results nor problems is not storable:
        // either the parser vouches for data or it flags the run.
        let has_results = run.pass_count.is_some()
            || run.fail_count.is_some()
            || run.testcases.as_ref().is_some_and(|t| !t.is_empty());
        if !has_results && run.problems.is_empty() {
            return Err(BunsenError::ParseRejected(
                "testrun has no results and no problems recorded".into(),
            ));
        }

        // Normalize: engine version, timestamp fallback chain, year_month.
        run.bunsen_version = Some(BUNSEN_VERSION.to_string());
        self.normalize_timestamp(project, &mut run);
        let timestamp = run
            .parsed_timestamp()
            .expect("normalized testrun has a timestamp");
        let year_month = timestamp.format("%Y-%m").to_string();
        run.year_month = Some(year_month.clone());
        let commit_time = timestamp.timestamp();

        // Select branches.
        let extra = parser_label.as_deref().or(extra_label);
        let logs_branch = BranchName::testlogs(project, &year_month);
        let runs_branch = BranchName::testruns(project, &year_month, extra);
        run.bunsen_testlogs_branch = Some(logs_branch.to_string());
        run.bunsen_testruns_branch = Some(runs_branch.to_string());

        // Validation aborts the ingest before any ref moves. The real
        // commit id is deterministic but not yet known; probe with a
        // placeholder of the right shape.
        {
            let mut probe = run.clone();
            probe.bunsen_commit_id = Some("0".repeat(40));
            probe.validate().map_err(BunsenError::ValidationFailed)?;
        }

        // Build the logs tree. Unreferenced objects are harmless if we
        // abort later.
        let mut entries = Vec::with_capacity(files.len());
        for (path, bytes) in &files {
            entries.push(TreeEntry {
                path: path.clone(),
                id: self.store().put_blob(bytes)?,
            });
        }
        let tree = self.store().put_tree(&entries)?;

        // The commit-message summary cannot contain the commit's own id;
        // it is reconstructed from the commit itself when read back.
        let summary_json =
            canonical_json(&run.summary()).map_err(BunsenError::ValidationFailed)?;
        let message = branch::testlogs_commit_message(&logs_branch, files.len(), &summary_json);
        let logs_branch_name = logs_branch.to_string();

        // Case dispatch: find identical log bytes already on the branch,
        // or fast-forward a fresh commit onto it.
        let mut created = false;
        let mut attempt = 0;
        let id = loop {
            attempt += 1;
            let tip = self.store().resolve_ref(&logs_branch_name)?;
            if let Some(tip) = &tip {
                if let Some(dup) = self
                    .store()
                    .history(tip)?
                    .into_iter()
                    .find(|c| c.tree == tree)
                {
                    debug!(id = %dup.id, "log bundle already stored, reusing commit");
                    break dup.id;
                }
            }
            let parents: Vec<Id> = tip.iter().cloned().collect();
            let commit = self
                .store()
                .make_commit(&tree, &parents, commit_time, &message)?;
            match self
                .store()
                .update_ref(&logs_branch_name, tip.as_ref(), &commit)
            {
                Ok(()) => {
                    created = true;
                    break commit;
                }
                Err(StoreError::RefConflict { .. }) if attempt < MAX_REF_RETRIES => {
                    debug!(branch = %logs_branch_name, attempt, "testlogs ref moved, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        };
        run.bunsen_commit_id = Some(id.clone());

        if created {
            // The testlogs ref has advanced; finish the other two views
            // or report the repo incomplete-but-repairable.
            self.finish_views(&run, project, &year_month, commit_time)
                .map_err(|err| BunsenError::Incomplete {
                    id: id.clone(),
                    reason: err.to_string(),
                })?;
            info!(id = %id, branch = %logs_branch_name, "stored new testrun");
            return Ok(IngestOutcome {
                bunsen_commit_id: id,
                case: IngestCase::New,
            });
        }

        match find_full_testrun(self.store(), project, &id)? {
            None => {
                // Known logs, first testrun record for them.
                self.finish_views(&run, project, &year_month, commit_time)?;
                info!(id = %id, "stored testrun for existing log bundle");
                Ok(IngestOutcome {
                    bunsen_commit_id: id,
                    case: IngestCase::DupLogsNewRun,
                })
            }
            Some((stored_branch, stored_bytes)) => {
                // The stored file's branch is authoritative: a replaced
                // record must not fork onto a second branch.
                run.bunsen_testruns_branch = Some(stored_branch.clone());
                let new_bytes = canonical_json(&run).map_err(BunsenError::ValidationFailed)?;
                if stored_bytes == new_bytes.as_bytes() {
                    // Byte-identical re-submission.
                    debug!(id = %id, "re-ingest is a no-op");
                    return Ok(IngestOutcome {
                        bunsen_commit_id: id,
                        case: IngestCase::Unchanged,
                    });
                }
                // Changed record: replace the full file and the one
                // index entry.
                self.finish_views(&run, project, &year_month, commit_time)?;
                info!(id = %id, "updated stored testrun");
                Ok(IngestOutcome {
                    bunsen_commit_id: id,
                    case: IngestCase::Updated,
                })
            }
        }
    }

    /// Write the full-testrun file, then the index entry. Ordering
    /// matters for crash recovery: testlogs before testruns before index.
    fn finish_views(
        &self,
        run: &Testrun,
        project: &str,
        year_month: &str,
        commit_time: i64,
    ) -> Result<()> {
        write_full_testrun(self.store(), run, commit_time)?;
        update_index_entry(self.store(), project, year_month, &run.summary(), commit_time)?;
        Ok(())
    }

    /// Fill a missing timestamp: parsed value, then the source commit's
    /// author date, then the ingest wall clock.
    fn normalize_timestamp(&self, project: &str, run: &mut Testrun) {
        if run.parsed_timestamp().is_some() {
            return;
        }
        if let Some(raw) = &run.timestamp {
            warn!(timestamp = %raw, "unparseable timestamp, falling back");
        }

        let source_repo = self
            .config()
            .project(project)
            .and_then(|p| p.source_repo.clone());
        if let (Some(repo), Some(commit)) = (source_repo, run.source_commit_id.clone()) {
            if let Some(when) = source_author_date(repo, commit) {
                run.timestamp = Some(when.to_rfc3339_opts(SecondsFormat::Secs, true));
                return;
            }
        }

        run.timestamp = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
    }
}

/// Drop file names not covered by the manifest globs. An empty manifest
/// accepts everything.
fn filter_manifest(files: FileMap, manifest: &[String]) -> FileMap {
    if manifest.is_empty() {
        return files;
    }
    files
        .into_iter()
        .filter(|(name, _)| {
            let keep = manifest.iter().any(|g| glob_match(g, name));
            if !keep {
                warn!(file = %name, "dropping file not covered by manifest");
            }
            keep
        })
        .collect()
}

/// Author date of `commit` in the configured source repo, with a hard
/// timeout. Runs on a helper thread so a hung filesystem cannot stall
/// ingest.
fn source_author_date(
    repo_path: std::path::PathBuf,
    commit: String,
) -> Option<chrono::DateTime<Utc>> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let seconds = (|| {
            let repo = git2::Repository::open(&repo_path).ok()?;
            let object = repo.revparse_single(&commit).ok()?;
            let commit = object.peel_to_commit().ok()?;
            let seconds = commit.author().when().seconds();
            Some(seconds)
        })();
        let _ = tx.send(seconds);
    });
    match rx.recv_timeout(SOURCE_REPO_TIMEOUT) {
        Ok(Some(seconds)) => Utc.timestamp_opt(seconds, 0).single(),
        Ok(None) => None,
        Err(_) => {
            warn!("source repo timestamp lookup timed out");
            None
        }
    }
}
