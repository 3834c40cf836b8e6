//! Testrun and testcase records stored in the Bunsen git repo.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cursor::Cursor;
use crate::{branch, ModelError};

/// DejaGNU outcome codes for a single testcase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Pass,
    Fail,
    Xfail,
    Xpass,
    Kfail,
    Kpass,
    Untested,
    Unresolved,
    Unsupported,
    Error,
}

impl Outcome {
    /// Outcomes counted towards `pass_count`.
    pub fn is_pass(self) -> bool {
        matches!(self, Outcome::Pass | Outcome::Xpass)
    }

    /// Outcomes counted towards `fail_count`. `Error` is not among
    /// them: only tcl-sourcing errors are tallied, which the parser
    /// decides from the message. `Kpass`, `Untested`, `Unresolved`,
    /// and `Unsupported` are recorded but never tallied.
    pub fn is_fail(self) -> bool {
        matches!(self, Outcome::Fail | Outcome::Kfail | Outcome::Xfail)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Pass => "PASS",
            Outcome::Fail => "FAIL",
            Outcome::Xfail => "XFAIL",
            Outcome::Xpass => "XPASS",
            Outcome::Kfail => "KFAIL",
            Outcome::Kpass => "KPASS",
            Outcome::Untested => "UNTESTED",
            Outcome::Unresolved => "UNRESOLVED",
            Outcome::Unsupported => "UNSUPPORTED",
            Outcome::Error => "ERROR",
        }
    }
}

impl FromStr for Outcome {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PASS" => Ok(Outcome::Pass),
            "FAIL" => Ok(Outcome::Fail),
            "XFAIL" => Ok(Outcome::Xfail),
            "XPASS" => Ok(Outcome::Xpass),
            "KFAIL" => Ok(Outcome::Kfail),
            "KPASS" => Ok(Outcome::Kpass),
            "UNTESTED" => Ok(Outcome::Untested),
            "UNRESOLVED" => Ok(Outcome::Unresolved),
            "UNSUPPORTED" => Ok(Outcome::Unsupported),
            "ERROR" => Ok(Outcome::Error),
            other => Err(ModelError::Validation(format!(
                "unknown outcome '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single testcase result within a full testrun.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Testcase {
    pub name: String,

    pub outcome: Outcome,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtest: Option<String>,

    /// Cursor into the `.log` file where this result originated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_log: Option<Cursor>,

    /// Cursor into the `.sum` file where this result originated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_sum: Option<Cursor>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Testcase {
    pub fn new(name: impl Into<String>, outcome: Outcome) -> Self {
        Testcase {
            name: name.into(),
            outcome,
            subtest: None,
            origin_log: None,
            origin_sum: None,
            extra: BTreeMap::new(),
        }
    }
}

/// One execution of a test suite.
///
/// The reserved fields below are typed; every other key in the JSON record
/// is a configuration field (architecture, kernel version, compiler
/// version, ...) kept verbatim in `config`. The full set of configuration
/// fields is the equivalence key used when matching testruns across
/// commits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Testrun {
    /// Engine version that produced this record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bunsen_version: Option<String>,

    /// Content-address of the testlogs commit (40-hex).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bunsen_commit_id: Option<String>,

    /// Branch holding the testlogs commit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bunsen_testlogs_branch: Option<String>,

    /// Branch holding the full testrun JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bunsen_testruns_branch: Option<String>,

    /// ISO-8601 timestamp of the run. Kept verbatim as submitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// `YYYY-MM` derived from `timestamp`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year_month: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Commit of the tested project this run was built from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_commit_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_branch: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub osver: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_host: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_board: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass_count: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_count: Option<u64>,

    /// References to testruns sharing the same testlogs commit,
    /// as `<branch>:<bunsen_commit_id>` strings. Stored verbatim.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub related_testruns_branches: Vec<String>,

    /// Diagnostics recorded by the parser. Non-empty means the parser
    /// flagged the run as incomplete or suspicious.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub problems: Vec<String>,

    /// Logically deleted; excluded from queries.
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub obsolete: bool,

    /// Per-testcase results. Absent in the summary form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub testcases: Option<Vec<Testcase>>,

    /// Configuration fields carrying system identity.
    #[serde(flatten)]
    pub config: BTreeMap<String, Value>,
}

impl Testrun {
    /// Parse a testrun from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Canonical JSON encoding (sorted keys, no insignificant whitespace).
    pub fn to_json(&self) -> Result<String, ModelError> {
        crate::canonical::canonical_json(self)
    }

    /// Clone of this testrun with the `testcases` field stripped.
    pub fn summary(&self) -> Testrun {
        let mut s = self.clone();
        s.testcases = None;
        s
    }

    pub fn is_summary(&self) -> bool {
        self.testcases.is_none()
    }

    /// Parsed `timestamp` field, if present and well-formed.
    pub fn parsed_timestamp(&self) -> Option<DateTime<FixedOffset>> {
        let raw = self.timestamp.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S %z"))
            .ok()
    }

    /// Append a testcase, converting the record to full form if needed.
    pub fn add_testcase(&mut self, testcase: Testcase) {
        self.testcases.get_or_insert_with(Vec::new).push(testcase);
    }

    /// Check the invariants required before this record may be stored.
    ///
    /// A record missing counts and testcases is only accepted when the
    /// parser flagged it via `problems`.
    pub fn validate(&self) -> Result<(), ModelError> {
        for field in [
            ("bunsen_version", &self.bunsen_version),
            ("bunsen_commit_id", &self.bunsen_commit_id),
            ("bunsen_testlogs_branch", &self.bunsen_testlogs_branch),
            ("bunsen_testruns_branch", &self.bunsen_testruns_branch),
        ] {
            if field.1.is_none() {
                return Err(ModelError::Validation(format!(
                    "missing required field '{}'",
                    field.0
                )));
            }
        }

        let id = self.bunsen_commit_id.as_deref().unwrap_or_default();
        if id.len() != 40 || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ModelError::Validation(format!(
                "bunsen_commit_id '{id}' is not a 40-hex id"
            )));
        }

        let logs: branch::BranchName = self
            .bunsen_testlogs_branch
            .as_deref()
            .unwrap_or_default()
            .parse()
            .map_err(|e| ModelError::Validation(format!("bad testlogs branch: {e}")))?;
        let runs: branch::BranchName = self
            .bunsen_testruns_branch
            .as_deref()
            .unwrap_or_default()
            .parse()
            .map_err(|e| ModelError::Validation(format!("bad testruns branch: {e}")))?;

        if let Some(ym) = &self.year_month {
            if *ym != logs.year_month || *ym != runs.year_month {
                return Err(ModelError::Validation(format!(
                    "year_month '{ym}' does not match branch names"
                )));
            }
            if let Some(ts) = self.parsed_timestamp() {
                if ts.format("%Y-%m").to_string() != *ym {
                    return Err(ModelError::Validation(format!(
                        "year_month '{ym}' does not match timestamp"
                    )));
                }
            }
        }

        for (key, value) in &self.config {
            if !matches!(
                value,
                Value::String(_) | Value::Number(_) | Value::Bool(_)
            ) {
                return Err(ModelError::Validation(format!(
                    "configuration field '{key}' must be a string, number, or bool"
                )));
            }
        }

        let has_results = self.pass_count.is_some()
            || self.fail_count.is_some()
            || self.testcases.as_ref().is_some_and(|t| !t.is_empty());
        if !has_results && self.problems.is_empty() {
            return Err(ModelError::Validation(
                "testrun has no results and no problems recorded".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_run() -> Testrun {
        let mut run = Testrun {
            bunsen_version: Some("0.1.0".into()),
            bunsen_commit_id: Some("a".repeat(40)),
            bunsen_testlogs_branch: Some("gdb/testlogs-2019-08".into()),
            bunsen_testruns_branch: Some("gdb/testruns-2019-08-Fedora-x86_64".into()),
            timestamp: Some("2019-08-05T12:30:00+00:00".into()),
            year_month: Some("2019-08".into()),
            pass_count: Some(2),
            fail_count: Some(1),
            ..Default::default()
        };
        run.config
            .insert("kernel_version".into(), Value::String("5.2.7".into()));
        run
    }

    #[test]
    fn outcome_round_trips_through_str() {
        for s in [
            "PASS", "FAIL", "XFAIL", "XPASS", "KFAIL", "KPASS", "UNTESTED",
            "UNRESOLVED", "UNSUPPORTED", "ERROR",
        ] {
            let outcome: Outcome = s.parse().unwrap();
            assert_eq!(outcome.as_str(), s);
        }
        assert!("DUPLICATE".parse::<Outcome>().is_err());
    }

    #[test]
    fn tally_classification_matches_dejagnu_conventions() {
        assert!(Outcome::Pass.is_pass());
        assert!(Outcome::Xpass.is_pass());
        assert!(Outcome::Fail.is_fail());
        assert!(Outcome::Kfail.is_fail());
        assert!(Outcome::Xfail.is_fail());
        // Recorded but never tallied.
        for outcome in [
            Outcome::Kpass,
            Outcome::Untested,
            Outcome::Unresolved,
            Outcome::Unsupported,
            Outcome::Error,
        ] {
            assert!(!outcome.is_pass());
            assert!(!outcome.is_fail());
        }
    }

    #[test]
    fn valid_testrun_passes_validation() {
        sample_run().validate().unwrap();
    }

    #[test]
    fn mismatched_year_month_is_rejected() {
        let mut run = sample_run();
        run.year_month = Some("2019-09".into());
        assert!(run.validate().is_err());
    }

    #[test]
    fn structured_config_field_is_rejected() {
        let mut run = sample_run();
        run.config
            .insert("bad".into(), serde_json::json!({"nested": true}));
        assert!(run.validate().is_err());
    }

    #[test]
    fn missing_results_require_problems() {
        let mut run = sample_run();
        run.pass_count = None;
        run.fail_count = None;
        assert!(run.validate().is_err());

        run.problems.push("incomplete log".into());
        run.validate().unwrap();
    }

    #[test]
    fn summary_strips_testcases() {
        let mut run = sample_run();
        run.add_testcase(Testcase::new("foo.exp", Outcome::Pass));
        assert!(!run.is_summary());
        let summary = run.summary();
        assert!(summary.is_summary());
        assert_eq!(summary.pass_count, Some(2));
    }

    #[test]
    fn config_fields_survive_round_trip() {
        let run = sample_run();
        let json = run.to_json().unwrap();
        let back = Testrun::from_json(&json).unwrap();
        assert_eq!(back, run);
        assert_eq!(
            back.config.get("kernel_version"),
            Some(&Value::String("5.2.7".into()))
        );
    }
}
