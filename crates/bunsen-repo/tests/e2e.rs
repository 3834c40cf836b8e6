//! End-to-end tests for the Bunsen repository engine.
//!
//! Exercises the full flow over a real bare git store:
//! 1. `init` lays out the repo and the `index` branch
//! 2. ingest packs a log bundle into the three views
//! 3. re-ingest deduplicates; updates replace in place
//! 4. `repair` heals a crash between view updates

use bunsen_model::{canonical_json, Cursor, Testrun};
use bunsen_parse::FileMap;
use bunsen_repo::bundle::read_tar_bundle;
use bunsen_repo::{Bunsen, BunsenError, IngestCase, WriteLock};

const GDB_SUM: &str = "\
Test run by buildslave on Mon Aug  5 12:30:00 2019
Native configuration is x86_64-pc-linux-gnu

Running ../../../gdb/testsuite/gdb.base/break.exp ...
PASS: gdb.base/break.exp: break main
FAIL: gdb.base/break.exp: break at bogus line
PASS: gdb.base/break.exp: continue to main
";

const GDB_LOG: &str = "\
GNU gdb verbose output
break main
Breakpoint 1 at 0x1139
";

fn gdb_bundle(log: &str) -> FileMap {
    let mut files = FileMap::new();
    files.insert("gdb.sum".into(), GDB_SUM.as_bytes().to_vec());
    files.insert("gdb.log".into(), log.as_bytes().to_vec());
    files.insert(
        "README.txt".into(),
        b"Logs for: fdd50265e61a7e5dcb0bc3d6cbf7c7a1dbf72908\nBranch tested: master\n".to_vec(),
    );
    files
}

fn branch_tip(base: &std::path::Path, branch: &str) -> Option<String> {
    let repo = git2::Repository::open(base.join("bunsen.git")).unwrap();
    repo.find_reference(&format!("refs/heads/{branch}"))
        .ok()
        .and_then(|r| r.target())
        .map(|oid| oid.to_string())
}

#[test]
fn fresh_repo_first_ingest() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Bunsen::init(dir.path()).unwrap();

    let out = repo
        .ingest("gdb", gdb_bundle(GDB_LOG), Some("Fedora-x86_64-m64"))
        .unwrap();
    assert_eq!(out.case, IngestCase::New);
    assert_eq!(out.bunsen_commit_id.len(), 40);

    // Branch layout.
    assert!(branch_tip(dir.path(), "index").is_some());
    assert_eq!(
        branch_tip(dir.path(), "gdb/testlogs-2019-08").as_deref(),
        Some(out.bunsen_commit_id.as_str())
    );
    assert!(branch_tip(dir.path(), "gdb/testruns-2019-08-Fedora-x86_64-m64").is_some());

    // Query surface.
    assert_eq!(repo.list_projects().unwrap(), vec!["gdb"]);
    assert_eq!(repo.list_months("gdb").unwrap(), vec!["2019-08"]);
    let runs = repo.list_testruns("gdb", Some("2019-08")).unwrap();
    assert_eq!(runs.len(), 1);
    let summary = &runs[0];
    assert_eq!(summary.pass_count, Some(2));
    assert_eq!(summary.fail_count, Some(1));
    assert_eq!(summary.arch.as_deref(), Some("x86_64"));
    assert_eq!(
        summary.source_commit_id.as_deref(),
        Some("fdd50265e61a7e5dcb0bc3d6cbf7c7a1dbf72908")
    );
    assert_eq!(summary.year_month.as_deref(), Some("2019-08"));

    let full = repo.get_testrun(&out.bunsen_commit_id).unwrap();
    assert_eq!(full.testcases.as_ref().unwrap().len(), 3);
    // Cross-view consistency.
    assert_eq!(
        canonical_json(&full.summary()).unwrap(),
        canonical_json(summary).unwrap()
    );

    // Stored logs are byte-identical.
    assert_eq!(
        repo.open_log(&out.bunsen_commit_id, "gdb.log").unwrap(),
        GDB_LOG.as_bytes()
    );
    let mut logs = repo.list_logs(&out.bunsen_commit_id).unwrap();
    logs.sort();
    assert_eq!(logs, ["README.txt", "gdb.log", "gdb.sum"]);
}

#[test]
fn reingest_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Bunsen::init(dir.path()).unwrap();

    let first = repo.ingest("gdb", gdb_bundle(GDB_LOG), None).unwrap();
    let logs_tip = branch_tip(dir.path(), "gdb/testlogs-2019-08");
    let runs_tip = branch_tip(dir.path(), "gdb/testruns-2019-08");
    let index_tip = branch_tip(dir.path(), "index");

    let second = repo.ingest("gdb", gdb_bundle(GDB_LOG), None).unwrap();
    assert_eq!(second.case, IngestCase::Unchanged);
    assert_eq!(second.bunsen_commit_id, first.bunsen_commit_id);

    // Repo is bit-identical: no branch moved.
    assert_eq!(branch_tip(dir.path(), "gdb/testlogs-2019-08"), logs_tip);
    assert_eq!(branch_tip(dir.path(), "gdb/testruns-2019-08"), runs_tip);
    assert_eq!(branch_tip(dir.path(), "index"), index_tip);
}

#[test]
fn corrected_counts_replace_views_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Bunsen::init(dir.path()).unwrap();

    let first = repo.ingest("gdb", gdb_bundle(GDB_LOG), None).unwrap();
    let logs_tip = branch_tip(dir.path(), "gdb/testlogs-2019-08");

    let corrected = Testrun {
        timestamp: Some("2019-08-05T12:30:00+00:00".into()),
        pass_count: Some(3),
        fail_count: Some(0),
        ..Default::default()
    };
    let second = repo
        .ingest_parsed("gdb", gdb_bundle(GDB_LOG), corrected, None)
        .unwrap();
    assert_eq!(second.case, IngestCase::Updated);
    assert_eq!(second.bunsen_commit_id, first.bunsen_commit_id);

    // Testlogs branch unchanged; one summary, replaced not duplicated.
    assert_eq!(branch_tip(dir.path(), "gdb/testlogs-2019-08"), logs_tip);
    let runs = repo.list_testruns("gdb", Some("2019-08")).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].pass_count, Some(3));
    let full = repo.get_testrun(&first.bunsen_commit_id).unwrap();
    assert_eq!(full.pass_count, Some(3));
}

#[test]
fn whitespace_difference_stores_two_runs() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Bunsen::init(dir.path()).unwrap();

    let first = repo.ingest("gdb", gdb_bundle(GDB_LOG), None).unwrap();
    let second = repo
        .ingest("gdb", gdb_bundle("GNU gdb verbose output \nbreak main\nBreakpoint 1 at 0x1139\n"), None)
        .unwrap();
    assert_eq!(second.case, IngestCase::New);
    assert_ne!(first.bunsen_commit_id, second.bunsen_commit_id);

    let runs = repo.list_testruns("gdb", Some("2019-08")).unwrap();
    assert_eq!(runs.len(), 2);
}

#[test]
fn repair_heals_a_crash_between_views() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Bunsen::init(dir.path()).unwrap();

    let index_before = branch_tip(dir.path(), "index").unwrap();
    let out = repo.ingest("gdb", gdb_bundle(GDB_LOG), None).unwrap();

    // Simulate a crash after the testlogs ref advanced: drop the
    // testruns branch and rewind the index commit.
    {
        let git = git2::Repository::open(dir.path().join("bunsen.git")).unwrap();
        let mut runs_ref = git
            .find_reference("refs/heads/gdb/testruns-2019-08")
            .unwrap();
        runs_ref.delete().unwrap();
        git.reference(
            "refs/heads/index",
            git2::Oid::from_str(&index_before).unwrap(),
            true,
            "test: rewind index",
        )
        .unwrap();
    }
    assert!(repo.list_testruns("gdb", Some("2019-08")).unwrap().is_empty());

    let report = repo.repair().unwrap();
    assert_eq!(report.full_files_rebuilt, 1);
    assert_eq!(report.index_entries_added, 1);

    // Final state matches a non-crashing ingest: summary queryable,
    // full record present, and a byte-identical re-ingest is a no-op.
    let runs = repo.list_testruns("gdb", Some("2019-08")).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(
        runs[0].bunsen_commit_id.as_deref(),
        Some(out.bunsen_commit_id.as_str())
    );
    let replay = repo.ingest("gdb", gdb_bundle(GDB_LOG), None).unwrap();
    assert_eq!(replay.bunsen_commit_id, out.bunsen_commit_id);
}

#[test]
fn tar_bundles_flow_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Bunsen::init(dir.path()).unwrap();

    let mut builder = tar::Builder::new(Vec::new());
    for (name, contents) in [
        ("gdb.sum", GDB_SUM.as_bytes()),
        ("gdb.log", GDB_LOG.as_bytes()),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, contents).unwrap();
    }
    let tar_bytes = builder.into_inner().unwrap();

    let files = read_tar_bundle(&tar_bytes).unwrap();
    let out = repo.ingest("gdb", files, None).unwrap();
    assert_eq!(out.case, IngestCase::New);
    assert_eq!(
        repo.open_log(&out.bunsen_commit_id, "gdb.sum").unwrap(),
        GDB_SUM.as_bytes()
    );
}

#[test]
fn cursors_stay_stable_as_runs_accumulate() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Bunsen::init(dir.path()).unwrap();

    let first = repo.ingest("gdb", gdb_bundle(GDB_LOG), None).unwrap();
    let cursor: Cursor = format!("{}:gdb.sum:5-6", first.bunsen_commit_id)
        .parse()
        .unwrap();
    let before = repo.resolve_cursor(&cursor).unwrap();

    // Adding more runs must not disturb resolution of the old cursor.
    repo.ingest("gdb", gdb_bundle("other log\n"), None).unwrap();
    repo.ingest("gdb", gdb_bundle("third log\n"), None).unwrap();

    let after = repo.resolve_cursor(&cursor).unwrap();
    assert_eq!(before, after);
    assert_eq!(
        after.text,
        "PASS: gdb.base/break.exp: break main\nFAIL: gdb.base/break.exp: break at bogus line\n"
    );
}

#[test]
fn writers_serialize_on_the_repo_lock() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Bunsen::init(dir.path()).unwrap();

    let held = WriteLock::acquire(dir.path()).unwrap();
    let err = repo
        .try_ingest("gdb", gdb_bundle(GDB_LOG), None)
        .unwrap_err();
    assert!(matches!(err, BunsenError::LockHeld));

    drop(held);
    repo.try_ingest("gdb", gdb_bundle(GDB_LOG), None).unwrap();
}

#[test]
fn prefix_lookup_works_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let out = {
        let repo = Bunsen::init(dir.path()).unwrap();
        repo.ingest("gdb", gdb_bundle(GDB_LOG), None).unwrap()
    };

    // A fresh handle sees the same data.
    let repo = Bunsen::open(dir.path()).unwrap();
    let by_prefix = repo.get_testrun(&out.bunsen_commit_id[..8]).unwrap();
    assert_eq!(
        by_prefix.bunsen_commit_id.as_deref(),
        Some(out.bunsen_commit_id.as_str())
    );
}
