//! Branch and index-file naming grammar.
//!
//! The repo stores three parallel views:
//! - `index` holds `<project>-YYYY-MM.json` summary files,
//! - `<project>/testlogs-YYYY-MM` holds the raw log bundles,
//! - `<project>/testruns-YYYY-MM[-<extra>]` holds full testrun JSON.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::ModelError;

/// The single summary-index branch.
pub const INDEX_BRANCH: &str = "index";

/// Separator between the commit-message header and the summary JSON.
pub const INDEX_SEPARATOR: &str = "\n---\n";

static BRANCH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<project>[A-Za-z0-9_.+-]+)/test(?P<kind>logs|runs)-(?P<ym>[0-9]{4}-[0-9]{2})(?:-(?P<extra>.+))?$",
    )
    .expect("branch regex")
});

static INDEXFILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<project>[A-Za-z0-9_.+-]+)-(?P<ym>[0-9]{4}-[0-9]{2})\.json$")
        .expect("indexfile regex")
});

static PROJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.+-]+$").expect("project regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    Testlogs,
    Testruns,
}

/// A parsed `<project>/test{logs,runs}-YYYY-MM[-extra]` branch name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchName {
    pub project: String,
    pub kind: BranchKind,
    pub year_month: String,
    pub extra_label: Option<String>,
}

impl BranchName {
    pub fn testlogs(project: &str, year_month: &str) -> Self {
        BranchName {
            project: project.to_string(),
            kind: BranchKind::Testlogs,
            year_month: year_month.to_string(),
            extra_label: None,
        }
    }

    pub fn testruns(project: &str, year_month: &str, extra_label: Option<&str>) -> Self {
        BranchName {
            project: project.to_string(),
            kind: BranchKind::Testruns,
            year_month: year_month.to_string(),
            extra_label: extra_label.map(str::to_string),
        }
    }
}

impl FromStr for BranchName {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = BRANCH_RE
            .captures(s)
            .ok_or_else(|| ModelError::InvalidBranch(s.to_string()))?;
        let kind = match &caps["kind"] {
            "logs" => BranchKind::Testlogs,
            _ => BranchKind::Testruns,
        };
        Ok(BranchName {
            project: caps["project"].to_string(),
            kind,
            year_month: caps["ym"].to_string(),
            extra_label: caps.name("extra").map(|m| m.as_str().to_string()),
        })
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            BranchKind::Testlogs => "testlogs",
            BranchKind::Testruns => "testruns",
        };
        write!(f, "{}/{}-{}", self.project, kind, self.year_month)?;
        if let Some(extra) = &self.extra_label {
            write!(f, "-{extra}")?;
        }
        Ok(())
    }
}

/// Validate a submitter-chosen project name.
pub fn validate_project(name: &str) -> Result<(), ModelError> {
    if PROJECT_RE.is_match(name) {
        Ok(())
    } else {
        Err(ModelError::InvalidProject(name.to_string()))
    }
}

/// `<project>-YYYY-MM.json`, the per-month file on the `index` branch.
pub fn index_file_name(project: &str, year_month: &str) -> String {
    format!("{project}-{year_month}.json")
}

/// Parse an index-file name back into `(project, year_month)`.
pub fn parse_index_file_name(name: &str) -> Option<(String, String)> {
    let caps = INDEXFILE_RE.captures(name)?;
    Some((caps["project"].to_string(), caps["ym"].to_string()))
}

/// `<project>-<bunsen_commit_id>.json`, the per-run file on a testruns branch.
pub fn testrun_file_name(project: &str, bunsen_commit_id: &str) -> String {
    format!("{project}-{bunsen_commit_id}.json")
}

/// Build the commit message for a testlogs commit: a human-readable header
/// naming the branch, then the canonical summary JSON after a separator.
pub fn testlogs_commit_message(branch: &BranchName, log_count: usize, summary_json: &str) -> String {
    format!(
        "{branch}: testsuite run with {log_count} testlogs{INDEX_SEPARATOR}{summary_json}\n"
    )
}

/// Extract the summary JSON back out of a testlogs commit message.
pub fn summary_from_commit_message(message: &str) -> Option<&str> {
    let at = message.rfind(INDEX_SEPARATOR)?;
    Some(message[at + INDEX_SEPARATOR.len()..].trim_end_matches('\n'))
}
