//! bunsen CLI
//!
//! Exit codes: 0 ok, 1 generic error, 2 invalid input, 3 store error or
//! ref conflict after retries, 4 ambiguous id/script.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use bunsen_model::Cursor;
use bunsen_repo::bundle::{read_bundle_file, read_tar_bundle};
use bunsen_repo::{Bunsen, BunsenError, ErrorKind};
use clap::{Parser, Subcommand};
use tracing::error;

#[derive(Parser)]
#[command(name = "bunsen")]
#[command(about = "Content-addressed storage and indexing for test-suite logs")]
struct Cli {
    /// Repo location (defaults to $BUNSEN_ROOT, then the current directory)
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty Bunsen repo
    Init {
        /// Directory to initialize
        dir: PathBuf,
    },

    /// Ingest a tarball of test logs
    Ingest {
        /// Project to file the testrun under
        #[arg(long)]
        project: Option<String>,

        /// Extra label appended to the testruns branch name
        #[arg(long)]
        extra: Option<String>,

        /// Path to a .tar or .tar.gz bundle, or '-' for standard input
        tar: String,
    },

    /// List stored testruns
    ListRuns {
        #[arg(long)]
        project: Option<String>,

        /// Restrict to one YYYY-MM month
        #[arg(long)]
        month: Option<String>,
    },

    /// List or print the log files of a testrun
    GetLogs {
        /// bunsen_commit_id, or any unique prefix of at least 4 characters
        id: String,

        /// Log path to print; omitted, lists the stored paths
        path: Option<String>,
    },

    /// Resolve a cursor and print the referenced lines
    ShowCursor {
        /// Cursor of the form [<commit>:]<path>:<start>[-<end>]
        cursor: String,
    },

    /// Rebuild missing index entries and full-testrun files
    Repair,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::from(exit_code(err.kind()))
        }
    }
}

fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::ParseRejected | ErrorKind::ValidationFailed | ErrorKind::BadConfig => 2,
        ErrorKind::StoreIo | ErrorKind::RefConflict => 3,
        ErrorKind::AmbiguousId | ErrorKind::AmbiguousScript => 4,
        ErrorKind::NotFound | ErrorKind::LockHeld => 1,
    }
}

fn repo_dir(cli_repo: Option<PathBuf>) -> PathBuf {
    cli_repo
        .or_else(|| std::env::var_os("BUNSEN_ROOT").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn run(cli: Cli) -> Result<(), BunsenError> {
    match cli.command {
        Commands::Init { dir } => {
            Bunsen::init(&dir)?;
            println!("initialized Bunsen repo at {}", dir.display());
            Ok(())
        }

        Commands::Ingest {
            project,
            extra,
            tar,
        } => {
            let repo = Bunsen::open(&repo_dir(cli.repo))?;
            let project = project
                .or_else(|| repo.config().default_project.clone())
                .ok_or_else(|| {
                    BunsenError::BadConfig(
                        "no project given and no [core] project configured".into(),
                    )
                })?;

            let files = if tar == "-" {
                let mut bytes = Vec::new();
                std::io::stdin().read_to_end(&mut bytes)?;
                read_tar_bundle(&bytes)?
            } else {
                read_bundle_file(&PathBuf::from(&tar))?
            };

            let out = repo.ingest(&project, files, extra.as_deref())?;
            println!("{}", out.bunsen_commit_id);
            Ok(())
        }

        Commands::ListRuns { project, month } => {
            let repo = Bunsen::open(&repo_dir(cli.repo))?;
            let projects = match project {
                Some(project) => vec![project],
                None => repo.list_projects()?,
            };
            for project in projects {
                for run in repo.list_testruns(&project, month.as_deref())? {
                    let id = run.bunsen_commit_id.as_deref().unwrap_or("-");
                    let ym = run.year_month.as_deref().unwrap_or("-");
                    let pass = run.pass_count.unwrap_or(0);
                    let fail = run.fail_count.unwrap_or(0);
                    let flag = if run.problems.is_empty() { "" } else { " [problems]" };
                    println!("{id} {project} {ym} pass={pass} fail={fail}{flag}");
                }
            }
            Ok(())
        }

        Commands::GetLogs { id, path } => {
            let repo = Bunsen::open(&repo_dir(cli.repo))?;
            match path {
                Some(path) => {
                    let bytes = repo.open_log(&id, &path)?;
                    std::io::stdout().write_all(&bytes)?;
                }
                None => {
                    for path in repo.list_logs(&id)? {
                        println!("{path}");
                    }
                }
            }
            Ok(())
        }

        Commands::ShowCursor { cursor } => {
            let repo = Bunsen::open(&repo_dir(cli.repo))?;
            let cursor: Cursor = cursor.parse().map_err(BunsenError::ValidationFailed)?;
            let resolved = repo.resolve_cursor(&cursor)?;
            print!("{}", resolved.text);
            if resolved.truncated {
                eprintln!("(range truncated to the stored log)");
            }
            Ok(())
        }

        Commands::Repair => {
            let repo = Bunsen::open(&repo_dir(cli.repo))?;
            let report = repo.repair()?;
            println!(
                "repair: rebuilt {} full testrun file(s), appended {} index entr(y/ies)",
                report.full_files_rebuilt, report.index_entries_added
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_kinds() {
        assert_eq!(exit_code(ErrorKind::ParseRejected), 2);
        assert_eq!(exit_code(ErrorKind::ValidationFailed), 2);
        assert_eq!(exit_code(ErrorKind::BadConfig), 2);
        assert_eq!(exit_code(ErrorKind::StoreIo), 3);
        assert_eq!(exit_code(ErrorKind::RefConflict), 3);
        assert_eq!(exit_code(ErrorKind::AmbiguousId), 4);
        assert_eq!(exit_code(ErrorKind::AmbiguousScript), 4);
        assert_eq!(exit_code(ErrorKind::NotFound), 1);
        assert_eq!(exit_code(ErrorKind::LockHeld), 1);
    }

    #[test]
    fn repo_dir_falls_back_to_cwd() {
        // Explicit flag wins over everything.
        assert_eq!(
            repo_dir(Some(PathBuf::from("/data/bunsen"))),
            PathBuf::from("/data/bunsen")
        );
    }

    #[test]
    fn cli_parses_ingest_flags() {
        let cli = Cli::parse_from([
            "bunsen", "ingest", "--project", "gdb", "--extra", "m64", "logs.tar",
        ]);
        match cli.command {
            Commands::Ingest {
                project,
                extra,
                tar,
            } => {
                assert_eq!(project.as_deref(), Some("gdb"));
                assert_eq!(extra.as_deref(), Some("m64"));
                assert_eq!(tar, "logs.tar");
            }
            _ => panic!("expected ingest"),
        }
    }
}
