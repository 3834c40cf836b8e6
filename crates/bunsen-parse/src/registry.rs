//! Parser registry and `scripts*/` discovery.
//!
//! Parsers run in-process and are registered by module name
//! (`<package>.commit_logs`). The repo's `scripts*/` directories are
//! scanned at open time: a `<package>/commit_logs.*` script maps that
//! package name onto the registered DejaGNU capability. A module name
//! provided in configuration resolves either exactly or as an
//! unambiguous suffix.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::{CommitParser, DejagnuParser, ParseError};

enum Entry {
    Parser(Arc<dyn CommitParser>),
    /// A script name found under more than one scripts root.
    Shadowed { roots: Vec<String> },
}

pub struct Registry {
    entries: BTreeMap<String, Entry>,
}

impl Registry {
    /// Registry with the built-in parsers only.
    pub fn builtin() -> Self {
        let mut registry = Registry {
            entries: BTreeMap::new(),
        };
        registry.register(Arc::new(DejagnuParser));
        registry
    }

    pub fn register(&mut self, parser: Arc<dyn CommitParser>) {
        self.entries
            .insert(parser.name().to_string(), Entry::Parser(parser));
    }

    /// Scan `scripts*` directories under `base_dir` for parser packages.
    ///
    /// Each `<scripts-root>/<package>/commit_logs.*` entry registers the
    /// module name `<package>.commit_logs`, backed by the DejaGNU
    /// capability. The same package appearing under two roots is
    /// recorded as shadowed and fails `AmbiguousScript` at resolve time.
    pub fn discover(&mut self, base_dir: &Path) -> Result<(), ParseError> {
        let mut seen: BTreeMap<String, Vec<String>> = BTreeMap::new();

        let entries = std::fs::read_dir(base_dir)
            .map_err(|e| ParseError::Discovery(format!("{}: {e}", base_dir.display())))?;
        for entry in entries.flatten() {
            let root = entry.path();
            let root_name = entry.file_name().to_string_lossy().to_string();
            if !root.is_dir() || !root_name.starts_with("scripts") {
                continue;
            }
            let Ok(packages) = std::fs::read_dir(&root) else {
                continue;
            };
            for package in packages.flatten() {
                let package_dir = package.path();
                if !package_dir.is_dir() {
                    continue;
                }
                let package_name = package.file_name().to_string_lossy().to_string();
                let has_commit_logs = std::fs::read_dir(&package_dir)
                    .map(|files| {
                        files.flatten().any(|f| {
                            f.path()
                                .file_stem()
                                .is_some_and(|stem| stem == "commit_logs")
                        })
                    })
                    .unwrap_or(false);
                if has_commit_logs {
                    let module = format!("{package_name}.commit_logs");
                    seen.entry(module).or_default().push(root_name.clone());
                }
            }
        }

        for (module, roots) in seen {
            if roots.len() > 1 {
                debug!(module, ?roots, "script name shadowed across roots");
                self.entries.insert(module, Entry::Shadowed { roots });
            } else {
                debug!(module, root = %roots[0], "discovered parser script");
                self.entries
                    .entry(module)
                    .or_insert_with(|| Entry::Parser(Arc::new(DejagnuParser)));
            }
        }
        Ok(())
    }

    /// Resolve a configured `commit_module` name to a parser.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn CommitParser>, ParseError> {
        if let Some(entry) = self.entries.get(name) {
            return resolve_entry(name, entry);
        }

        // Allow an unambiguous suffix, e.g. `commit_logs` when only one
        // package provides it.
        let matches: Vec<&String> = self
            .entries
            .keys()
            .filter(|k| k.split('.').next_back() == Some(name))
            .collect();
        match matches.as_slice() {
            [] => Err(ParseError::UnknownModule(name.to_string())),
            [only] => resolve_entry(name, &self.entries[*only]),
            many => Err(ParseError::AmbiguousScript {
                name: name.to_string(),
                candidates: many.iter().map(|s| s.to_string()).collect(),
            }),
        }
    }

    pub fn module_names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

fn resolve_entry(name: &str, entry: &Entry) -> Result<Arc<dyn CommitParser>, ParseError> {
    match entry {
        Entry::Parser(parser) => Ok(parser.clone()),
        Entry::Shadowed { roots } => Err(ParseError::AmbiguousScript {
            name: name.to_string(),
            candidates: roots.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn builtin_module_resolves() {
        let registry = Registry::builtin();
        let parser = registry.resolve("dejagnu.commit_logs").unwrap();
        assert_eq!(parser.name(), "dejagnu.commit_logs");
    }

    #[test]
    fn unknown_module_is_reported() {
        let registry = Registry::builtin();
        assert!(matches!(
            registry.resolve("nonesuch.commit_logs"),
            Err(ParseError::UnknownModule(_))
        ));
    }

    #[test]
    fn discovery_registers_script_packages() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("scripts-main/gdb")).unwrap();
        fs::write(
            dir.path().join("scripts-main/gdb/commit_logs.py"),
            "# parser",
        )
        .unwrap();

        let mut registry = Registry::builtin();
        registry.discover(dir.path()).unwrap();
        let parser = registry.resolve("gdb.commit_logs").unwrap();
        assert_eq!(parser.name(), "dejagnu.commit_logs");
    }

    #[test]
    fn shadowed_script_name_is_ambiguous() {
        let dir = tempfile::tempdir().unwrap();
        for root in ["scripts-main", "scripts-local"] {
            fs::create_dir_all(dir.path().join(root).join("gdb")).unwrap();
            fs::write(
                dir.path().join(root).join("gdb/commit_logs.py"),
                "# parser",
            )
            .unwrap();
        }

        let mut registry = Registry::builtin();
        registry.discover(dir.path()).unwrap();
        assert!(matches!(
            registry.resolve("gdb.commit_logs"),
            Err(ParseError::AmbiguousScript { .. })
        ));
    }

    #[test]
    fn suffix_resolution_requires_uniqueness() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("scripts/gdb")).unwrap();
        fs::write(dir.path().join("scripts/gdb/commit_logs.py"), "#").unwrap();

        let mut registry = Registry::builtin();
        registry.discover(dir.path()).unwrap();
        // Both the builtin and the gdb script provide `commit_logs`.
        assert!(matches!(
            registry.resolve("commit_logs"),
            Err(ParseError::AmbiguousScript { .. })
        ));

        // A fully-qualified name still resolves.
        registry.resolve("gdb.commit_logs").unwrap();
    }
}
