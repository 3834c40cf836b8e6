//! Reading submitted log bundles (`.tar`, `.tar.gz`) into a file map.

use std::io::Read;
use std::path::{Component, Path};

use bunsen_parse::FileMap;
use flate2::read::GzDecoder;
use tracing::warn;

use crate::{BunsenError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Read a tarball (optionally gzip-compressed) into a file map.
///
/// Only regular files are taken; entry paths are normalized and entries
/// that would escape the log tree are dropped.
pub fn read_tar_bundle(bytes: &[u8]) -> Result<FileMap> {
    let reader: Box<dyn Read + '_> = if bytes.starts_with(&GZIP_MAGIC) {
        Box::new(GzDecoder::new(bytes))
    } else {
        Box::new(bytes)
    };
    let mut archive = tar::Archive::new(reader);

    let mut files = FileMap::new();
    for entry in archive.entries().map_err(BunsenError::Io)? {
        let mut entry = entry.map_err(BunsenError::Io)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path().map_err(BunsenError::Io)?.into_owned();
        let Some(name) = sanitize_entry_path(&path) else {
            warn!(path = %path.display(), "dropping unsafe tar entry path");
            continue;
        };
        let mut contents = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut contents).map_err(BunsenError::Io)?;
        files.insert(name, contents);
    }
    Ok(files)
}

/// Read a bundle from a file on disk.
pub fn read_bundle_file(path: &Path) -> Result<FileMap> {
    let bytes = std::fs::read(path).map_err(BunsenError::Io)?;
    read_tar_bundle(&bytes)
}

/// Normalize a tar entry path to a `/`-joined relative path, refusing
/// absolute paths and parent traversal.
fn sanitize_entry_path(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn tarball(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, contents) in entries {
            let mut header = tar::Header::new_gnu();
            let name_bytes = name.as_bytes();
            header.as_old_mut().name[..name_bytes.len()].copy_from_slice(name_bytes);
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, *contents).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn plain_tar_round_trips() {
        let tar = tarball(&[("gdb.sum", b"PASS\n"), ("sub/gdb.log", b"detail\n")]);
        let files = read_tar_bundle(&tar).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files["gdb.sum"], b"PASS\n");
        assert_eq!(files["sub/gdb.log"], b"detail\n");
    }

    #[test]
    fn gzipped_tar_is_detected() {
        let tar = tarball(&[("t.sum", b"PASS\n")]);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar).unwrap();
        let gz = encoder.finish().unwrap();

        let files = read_tar_bundle(&gz).unwrap();
        assert_eq!(files["t.sum"], b"PASS\n");
    }

    #[test]
    fn traversal_entries_are_dropped() {
        let tar = tarball(&[("../evil", b"x"), ("ok.log", b"y")]);
        let files = read_tar_bundle(&tar).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files.contains_key("ok.log"));
    }

    #[test]
    fn dot_prefixed_names_are_normalized() {
        let tar = tarball(&[("./gdb.sum", b"PASS\n")]);
        let files = read_tar_bundle(&tar).unwrap();
        assert!(files.contains_key("gdb.sum"));
    }
}
