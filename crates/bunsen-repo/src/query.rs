//! Read-side surface: projects, months, testruns, logs, cursors.
//!
//! Readers never take the repo lock; they tolerate branch tips moving
//! between reads by re-reading when a tip advances mid-call.

use std::collections::BTreeSet;

use bunsen_model::{branch, BranchKind, BranchName, Cursor, ResolvedCursor, Testrun, INDEX_BRANCH};
use bunsen_store::{ObjectStore, StoreError};
use tracing::warn;

use crate::index::read_index_entries;
use crate::{Bunsen, BunsenError, Result};

/// Shortest accepted abbreviation of a bunsen_commit_id.
const MIN_ID_PREFIX: usize = 4;

impl Bunsen {
    /// Names of all projects in the repo: the union of projects with
    /// index files and projects with testlogs branches.
    pub fn list_projects(&self) -> Result<Vec<String>> {
        let mut projects = BTreeSet::new();
        for (project, _) in self.index_files()? {
            projects.insert(project);
        }
        for ref_name in self.store().ref_names()? {
            if let Ok(parsed) = ref_name.parse::<BranchName>() {
                if parsed.kind == BranchKind::Testlogs {
                    projects.insert(parsed.project);
                }
            }
        }
        Ok(projects.into_iter().collect())
    }

    /// Months with data for `project`, newest first.
    pub fn list_months(&self, project: &str) -> Result<Vec<String>> {
        let mut months = BTreeSet::new();
        for (file_project, year_month) in self.index_files()? {
            if file_project == project {
                months.insert(year_month);
            }
        }
        for ref_name in self.store().ref_names()? {
            if let Ok(parsed) = ref_name.parse::<BranchName>() {
                if parsed.kind == BranchKind::Testlogs && parsed.project == project {
                    months.insert(parsed.year_month);
                }
            }
        }
        Ok(months.into_iter().rev().collect())
    }

    /// Testrun summaries for `project`, optionally restricted to one
    /// month. Insertion order within a month, months newest first.
    /// Obsolete-marked runs are skipped.
    pub fn list_testruns(&self, project: &str, month: Option<&str>) -> Result<Vec<Testrun>> {
        let months = match month {
            Some(month) => vec![month.to_string()],
            None => self.list_months(project)?,
        };
        let mut runs = Vec::new();
        for month in months {
            for run in read_index_entries(self.store(), project, &month)? {
                if !run.obsolete {
                    runs.push(run);
                }
            }
        }
        Ok(runs)
    }

    /// Full testrun for an id or unique id prefix.
    pub fn get_testrun(&self, id_or_prefix: &str) -> Result<Testrun> {
        let (project, summary) = self.resolve_id(id_or_prefix)?;
        let id = summary.bunsen_commit_id.clone().unwrap_or_default();
        let Some(branch_name) = summary.bunsen_testruns_branch.clone() else {
            return Err(BunsenError::NotFound(format!(
                "summary for {id} names no testruns branch"
            )));
        };
        let file_name = branch::testrun_file_name(&project, &id);

        // Tolerate a writer advancing the branch between reads.
        for _ in 0..3 {
            let Some(tip) = self.store().resolve_ref(&branch_name)? else {
                break;
            };
            let bytes = match self.store().read_path(&tip, &file_name) {
                Ok(bytes) => bytes,
                Err(StoreError::NotFound(_)) => break,
                Err(err) => return Err(err.into()),
            };
            if self.store().resolve_ref(&branch_name)?.as_ref() == Some(&tip) {
                return Testrun::from_json(&String::from_utf8_lossy(&bytes))
                    .map_err(BunsenError::ValidationFailed);
            }
        }
        Err(BunsenError::NotFound(format!(
            "full testrun {file_name} on {branch_name}"
        )))
    }

    /// Log file paths stored for a testrun.
    pub fn list_logs(&self, id_or_prefix: &str) -> Result<Vec<String>> {
        let (_, summary) = self.resolve_id(id_or_prefix)?;
        let id = summary.bunsen_commit_id.unwrap_or_default();
        Ok(self
            .store()
            .read_tree(&id)?
            .into_iter()
            .map(|e| e.path)
            .collect())
    }

    /// Contents of one stored log file.
    pub fn open_log(&self, id_or_prefix: &str, path: &str) -> Result<Vec<u8>> {
        let (_, summary) = self.resolve_id(id_or_prefix)?;
        let id = summary.bunsen_commit_id.unwrap_or_default();
        self.store()
            .read_path(&id, path)
            .map_err(|_| BunsenError::NotFound(format!("log {path} under {id}")))
    }

    /// Resolve a cursor to the text of its line range.
    pub fn resolve_cursor(&self, cursor: &Cursor) -> Result<ResolvedCursor> {
        let Some(commit) = &cursor.commit_id else {
            return Err(BunsenError::NotFound(format!(
                "cursor '{cursor}' names no commit and no context supplies one"
            )));
        };
        let bytes = self.open_log(commit, &cursor.path)?;
        Ok(cursor.resolve(&bytes))
    }

    /// Resolve an id or abbreviation to `(project, summary)`.
    ///
    /// Abbreviations are hex prefixes of at least four characters; a
    /// prefix matching more than one stored id fails `AmbiguousId`.
    pub(crate) fn resolve_id(&self, id_or_prefix: &str) -> Result<(String, Testrun)> {
        let prefix = id_or_prefix.to_ascii_lowercase();
        if prefix.len() < MIN_ID_PREFIX || !prefix.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(BunsenError::ValidationFailed(
                bunsen_model::ModelError::Validation(format!(
                    "'{id_or_prefix}' is not a hex id prefix of at least {MIN_ID_PREFIX} characters"
                )),
            ));
        }

        let mut matches: Vec<(String, Testrun)> = Vec::new();
        for (project, year_month) in self.index_files()? {
            for run in read_index_entries(self.store(), &project, &year_month)? {
                let Some(id) = run.bunsen_commit_id.as_deref() else {
                    warn!(project, year_month, "index entry without bunsen_commit_id");
                    continue;
                };
                if id.to_ascii_lowercase().starts_with(&prefix)
                    && !matches
                        .iter()
                        .any(|(_, m)| m.bunsen_commit_id.as_deref() == Some(id))
                {
                    matches.push((project.clone(), run));
                }
            }
        }

        match matches.len() {
            0 => Err(BunsenError::NotFound(format!("testrun {id_or_prefix}"))),
            1 => Ok(matches.remove(0)),
            _ => Err(BunsenError::AmbiguousId {
                prefix: id_or_prefix.to_string(),
                candidates: matches
                    .into_iter()
                    .filter_map(|(_, m)| m.bunsen_commit_id)
                    .collect(),
            }),
        }
    }

    /// `(project, year_month)` of every file on the `index` branch.
    fn index_files(&self) -> Result<Vec<(String, String)>> {
        let Some(tip) = self.store().resolve_ref(INDEX_BRANCH)? else {
            return Ok(Vec::new());
        };
        Ok(self
            .store()
            .read_tree(&tip)?
            .into_iter()
            .filter_map(|e| branch::parse_index_file_name(&e.path))
            .collect())
    }
}
