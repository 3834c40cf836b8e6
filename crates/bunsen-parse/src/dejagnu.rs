//! Generic DejaGNU `.sum` parser.
//!
//! Handles the details shared by DejaGNU testsuites: outcome lines,
//! `Running foo.exp ...` section tracking, the `Native configuration is`
//! architecture line, and run timestamps. Project-specific parsers build
//! on the same structure with extra annotation passes.

use std::str::FromStr;
use std::sync::LazyLock;

use bunsen_model::{Cursor, Outcome, Testcase, Testrun};
use chrono::{NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use tracing::debug;

use crate::{CommitParser, FileMap, ParseError, ParseOutput};

/// Compact sumfiles encode the exp name in the outcome line itself.
static EXPNAME_SUBTEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<outcome>[A-Z]+): (?P<expname>[^:]*\.exp): (?P<subtest>.*)$")
        .expect("expname regex")
});

static OUTCOME_SUBTEST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<outcome>[A-Z]+): (?P<subtest>.*)$").expect("outcome regex"));

/// `Native configuration is <triple>` to a standard architecture name.
static ARCH_MAP: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (Regex::new(r"^powerpc64-\w+-linux.*").unwrap(), "ppc64"),
        (Regex::new(r"^powerpc64le-\w+-linux.*").unwrap(), "ppc64le"),
        (Regex::new(r"^armv7l-\w+-linux-gnueabihf").unwrap(), "armhf"),
    ]
});

static GENERIC_ARCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+)-\w+-linux.*").expect("arch regex"));

/// Buildbot metadata files that should never land in the log tree.
const SKIP_FILES: &[&str] = &["BUNSEN_COMMIT", "year_month.txt"];
const SKIP_PREFIXES: &[&str] = &["index.html", "baseline", "xfail", "previous_"];

pub struct DejagnuParser;

fn grok_architecture(triple: &str) -> Option<String> {
    for (re, arch) in ARCH_MAP.iter() {
        if re.is_match(triple) {
            return Some((*arch).to_string());
        }
    }
    GENERIC_ARCH_RE
        .captures(triple)
        .map(|caps| caps[1].to_string())
}

/// Extract `foo/bar.exp` from a `Running path/to/testsuite/foo/bar.exp ...` line.
fn running_exp_name(line: &str) -> Option<String> {
    let end = line.find(".exp")? + ".exp".len();
    let start = if let Some(at) = line[..end].rfind("/testsuite/") {
        at + "/testsuite/".len()
    } else if let Some(at) = line.find("Running ./") {
        at + "Running ./".len()
    } else {
        line.find("Running ")? + "Running ".len()
    };
    Some(line[start..end].to_string())
}

/// `Mon Aug  5 12:30:00 2019` (whitespace-normalized) to ISO-8601 UTC.
fn parse_runtest_date(raw: &str) -> Option<String> {
    let normalized: Vec<&str> = raw.split_whitespace().collect();
    let normalized = normalized.join(" ");
    let parsed = NaiveDateTime::parse_from_str(&normalized, "%a %b %d %H:%M:%S %Y").ok()?;
    Some(Utc.from_utc_datetime(&parsed).to_rfc3339())
}

fn keep_file(name: &str) -> bool {
    if SKIP_FILES.contains(&name) {
        return false;
    }
    !SKIP_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

fn parse_sum(run: &mut Testrun, sum_name: &str, contents: &[u8]) {
    let text = String::from_utf8_lossy(contents);
    let mut current_exp: Option<String> = None;
    let mut pass_count = 0u64;
    let mut fail_count = 0u64;

    for (idx, line) in text.split('\n').enumerate() {
        let line_no = (idx + 1) as u32;

        if let Some(rest) = line.strip_prefix("Test run by ") {
            if let Some((_, date)) = rest.split_once(" on ") {
                if run.timestamp.is_none() {
                    run.timestamp = parse_runtest_date(date);
                }
            }
            continue;
        }
        if let Some(date) = line.strip_prefix("runtest completed at ") {
            // Completion time wins over the start-of-run header.
            if let Some(ts) = parse_runtest_date(date) {
                run.timestamp = Some(ts);
            }
            continue;
        }
        if let Some(triple) = line.strip_prefix("Native configuration is ") {
            run.arch = grok_architecture(triple.trim());
            continue;
        }
        if let Some(host) = line.strip_prefix("pushing config for host, name is ") {
            run.origin_host = Some(host.trim().to_string());
            continue;
        }
        if line.starts_with("Running ") && line.contains(".exp") {
            current_exp = running_exp_name(line);
            continue;
        }

        let (outcome_str, name, subtest) = if let Some(caps) = EXPNAME_SUBTEST_RE.captures(line) {
            (
                caps["outcome"].to_string(),
                caps["expname"].to_string(),
                caps["subtest"].to_string(),
            )
        } else if let Some(caps) = OUTCOME_SUBTEST_RE.captures(line) {
            let Some(exp) = current_exp.clone() else {
                continue;
            };
            (caps["outcome"].to_string(), exp, caps["subtest"].to_string())
        } else {
            continue;
        };

        if outcome_str == "DUPLICATE" {
            run.problems
                .push(format!("{sum_name}:{line_no}: duplicate test name"));
            continue;
        }
        let Ok(outcome) = Outcome::from_str(&outcome_str) else {
            continue;
        };

        // KPASS, UNTESTED, UNRESOLVED, and UNSUPPORTED results are
        // recorded but never tallied; ERROR only counts as a failure
        // for tcl sourcing errors.
        if outcome.is_pass() {
            pass_count += 1;
        } else if outcome.is_fail()
            || (outcome == Outcome::Error && line.starts_with("ERROR: tcl error sourcing"))
        {
            fail_count += 1;
        }

        let mut testcase = Testcase::new(name, outcome);
        if !subtest.is_empty() {
            testcase.subtest = Some(subtest);
        }
        testcase.origin_sum = Cursor::new(sum_name, line_no, line_no).ok();
        run.add_testcase(testcase);
    }

    run.pass_count = Some(pass_count);
    run.fail_count = Some(fail_count);
}

fn parse_readme(run: &mut Testrun, contents: &[u8]) {
    let text = String::from_utf8_lossy(contents);
    for line in text.split('\n') {
        if let Some(rest) = line.strip_prefix("Logs for: ") {
            run.source_commit_id = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("Branch tested: ") {
            run.source_branch = Some(rest.trim().to_string());
        }
    }
}

impl CommitParser for DejagnuParser {
    fn name(&self) -> &str {
        "dejagnu.commit_logs"
    }

    fn parse(&self, files: &FileMap) -> Result<ParseOutput, ParseError> {
        if files.is_empty() {
            return Err(ParseError::Rejected("empty bundle".into()));
        }

        let kept: FileMap = files
            .iter()
            .filter(|(name, _)| keep_file(name))
            .map(|(name, bytes)| (name.clone(), bytes.clone()))
            .collect();

        let mut run = Testrun::default();

        if let Some((name, contents)) = kept.iter().find(|(name, _)| name.ends_with(".sum")) {
            parse_sum(&mut run, name, contents);
        } else {
            run.problems.push("no .sum file in bundle".into());
        }

        for (name, contents) in &kept {
            if name == "README.txt" || name.ends_with("/README.txt") {
                parse_readme(&mut run, contents);
            }
        }

        if run.testcases.as_ref().map_or(true, |t| t.is_empty()) && run.problems.is_empty() {
            run.problems.push("no test results recognized".into());
        }
        debug!(
            pass = run.pass_count,
            fail = run.fail_count,
            problems = run.problems.len(),
            "parsed dejagnu bundle"
        );

        Ok(ParseOutput {
            testrun: run,
            files: kept,
            extra_label: None,
        })
    }
}
