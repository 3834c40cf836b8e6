//! Repository configuration.
//!
//! `<repo>/config` is a git-style INI file:
//!
//! ```ini
//! [core]
//!     project = gdb
//! [project "gdb"]
//!     source_repo = /srv/git/binutils-gdb.git
//!     gitweb_url = https://sourceware.org/git/?p=binutils-gdb.git
//! [bunsen-upload]
//!     manifest = README.txt,gdb.log*,gdb.sum*
//!     commit_module = gdb.commit_logs
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::BunsenError;

/// Per-project settings from a `[project "<name>"]` section.
#[derive(Debug, Clone, Default)]
pub struct ProjectConfig {
    /// Path to a checkout of the tested project, used for the
    /// source-commit timestamp fallback.
    pub source_repo: Option<PathBuf>,

    pub gitweb_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RepoConfig {
    /// `[core] project`: project assumed when the submitter names none.
    pub default_project: Option<String>,

    pub projects: BTreeMap<String, ProjectConfig>,

    /// `[bunsen-upload] manifest`: globs of acceptable log file names.
    /// Empty means accept everything.
    pub manifest: Vec<String>,

    /// `[bunsen-upload] commit_module`: parser module for ingest.
    pub commit_module: Option<String>,
}

impl RepoConfig {
    /// Load the repo config file. A missing file yields the defaults, so
    /// a freshly initialized repo works without editing.
    pub fn load(path: &Path) -> Result<Self, BunsenError> {
        if !path.is_file() {
            return Ok(RepoConfig::default());
        }
        let ini = git2::Config::open(path)
            .map_err(|e| BunsenError::BadConfig(format!("{}: {}", path.display(), e.message())))?;

        let mut config = RepoConfig {
            default_project: get_opt(&ini, "core.project"),
            ..Default::default()
        };

        if let Some(raw) = get_opt(&ini, "bunsen-upload.manifest") {
            config.manifest = raw
                .split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(str::to_string)
                .collect();
        }
        config.commit_module = get_opt(&ini, "bunsen-upload.commit_module");

        let mut entries = ini
            .entries(None)
            .map_err(|e| BunsenError::BadConfig(e.message().to_string()))?;
        while let Some(entry) = entries.next() {
            let Ok(entry) = entry else { continue };
            let Some(name) = entry.name() else { continue };
            // Entry names look like `project.gdb.source_repo`; the
            // project name itself may contain dots, so split off the
            // first and last segments.
            let Some(rest) = name.strip_prefix("project.") else {
                continue;
            };
            let Some((project, key)) = rest.rsplit_once('.') else {
                continue;
            };
            let value = entry.value().unwrap_or_default().to_string();
            let project = config.projects.entry(project.to_string()).or_default();
            match key {
                "source_repo" => project.source_repo = Some(PathBuf::from(value)),
                "gitweb_url" => project.gitweb_url = Some(value),
                _ => {}
            }
        }

        Ok(config)
    }

    pub fn project(&self, name: &str) -> Option<&ProjectConfig> {
        self.projects.get(name)
    }
}

fn get_opt(ini: &git2::Config, key: &str) -> Option<String> {
    ini.get_string(key).ok().filter(|v| !v.is_empty())
}

/// Does `name` match the shell-style pattern (`*` and `?` wildcards)?
pub fn glob_match(pattern: &str, name: &str) -> bool {
    fn matches(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                matches(&p[1..], n) || (!n.is_empty() && matches(p, &n[1..]))
            }
            (Some(b'?'), Some(_)) => matches(&p[1..], &n[1..]),
            (Some(a), Some(b)) if a == b => matches(&p[1..], &n[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(
            &path,
            "[core]\n\tproject = gdb\n\
             [project \"gdb\"]\n\tsource_repo = /srv/gdb.git\n\tgitweb_url = https://example/gdb\n\
             [bunsen-upload]\n\tmanifest = README.txt,gdb.log*,gdb.sum*\n\tcommit_module = gdb.commit_logs\n",
        )
        .unwrap();

        let config = RepoConfig::load(&path).unwrap();
        assert_eq!(config.default_project.as_deref(), Some("gdb"));
        assert_eq!(config.manifest.len(), 3);
        assert_eq!(config.commit_module.as_deref(), Some("gdb.commit_logs"));
        let project = config.project("gdb").unwrap();
        assert_eq!(
            project.source_repo.as_deref(),
            Some(Path::new("/srv/gdb.git"))
        );
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RepoConfig::load(&dir.path().join("config")).unwrap();
        assert!(config.manifest.is_empty());
        assert!(config.default_project.is_none());
    }

    #[test]
    fn glob_matching() {
        assert!(glob_match("gdb.log*", "gdb.log"));
        assert!(glob_match("gdb.log*", "gdb.log.xz"));
        assert!(glob_match("*.sum", "systemtap.sum"));
        assert!(glob_match("README.txt", "README.txt"));
        assert!(glob_match("gdb.???", "gdb.log"));
        assert!(!glob_match("gdb.sum", "gdb.log"));
        assert!(!glob_match("*.sum", "gdb.sum.old"));
    }
}
