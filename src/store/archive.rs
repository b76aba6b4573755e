//! Deterministic tar export and guarded import of snapshot trees

use crate::error::{XplatError, XplatResult};
use crate::store::tree::{self, EntryKind};
use std::fs;
use std::io;
use std::path::{Component, Path};

/// Pack a tree into an uncompressed tar archive.
///
/// Entries are written in sorted path order with zero mtime, uid and gid,
/// so the same tree always produces the same bytes.
pub fn pack(root: &Path) -> XplatResult<Vec<u8>> {
    let entries = tree::walk(root)?;
    let mut builder = tar::Builder::new(Vec::new());
    builder.mode(tar::HeaderMode::Deterministic);

    for entry in &entries {
        let mut header = tar::Header::new_gnu();
        header.set_mode(entry.mode);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        let result = match entry.kind {
            EntryKind::Dir => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_size(0);
                builder.append_data(&mut header, format!("{}/", entry.rel), io::empty())
            }
            EntryKind::Symlink => {
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_size(0);
                let target = entry.target.clone().unwrap_or_default();
                builder.append_link(&mut header, &entry.rel, target)
            }
            EntryKind::File => {
                let path = root.join(&entry.rel);
                let file = fs::File::open(&path)
                    .map_err(|e| XplatError::io(format!("opening {}", path.display()), e))?;
                header.set_entry_type(tar::EntryType::Regular);
                header.set_size(entry.size);
                builder.append_data(&mut header, &entry.rel, file)
            }
        };
        result.map_err(|e| XplatError::io(format!("archiving {}", entry.rel), e))?;
    }

    builder
        .into_inner()
        .map_err(|e| XplatError::io("finishing archive", e))
}

/// Unpack a tar archive into `dest`.
///
/// Every entry path is checked first; absolute paths and `..` components
/// fail the whole import with `PathTraversal` before anything is written.
pub fn unpack(bytes: &[u8], dest: &Path) -> XplatResult<()> {
    let mut archive = tar::Archive::new(bytes);
    let entries = archive
        .entries()
        .map_err(|e| XplatError::io("reading archive", e))?;

    for entry in entries {
        let entry = entry.map_err(|e| XplatError::io("reading archive entry", e))?;
        let path = entry
            .path()
            .map_err(|e| XplatError::io("reading archive entry path", e))?;
        let unsafe_component = path.components().any(|c| {
            matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
        });
        if unsafe_component {
            return Err(XplatError::PathTraversal(path.display().to_string()));
        }
    }

    fs::create_dir_all(dest)
        .map_err(|e| XplatError::io(format!("creating {}", dest.display()), e))?;

    let mut archive = tar::Archive::new(bytes);
    archive.set_preserve_permissions(true);
    archive.set_preserve_ownerships(false);
    archive
        .unpack(dest)
        .map_err(|e| XplatError::io(format!("unpacking into {}", dest.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn pack_is_deterministic() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("bin")).unwrap();
        fs::write(temp.path().join("bin/tool"), "#!/bin/sh\n").unwrap();

        let first = pack(temp.path()).unwrap();
        let second = pack(temp.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unpack_restores_tree() {
        let src = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("etc")).unwrap();
        fs::write(src.path().join("etc/os-release"), "ID=xplat\n").unwrap();

        let bytes = pack(src.path()).unwrap();
        let dst = TempDir::new().unwrap();
        unpack(&bytes, dst.path()).unwrap();

        assert_eq!(
            fs::read_to_string(dst.path().join("etc/os-release")).unwrap(),
            "ID=xplat\n"
        );
        assert_eq!(
            tree::digest_tree(src.path()).unwrap(),
            tree::digest_tree(dst.path()).unwrap()
        );
    }

    #[test]
    fn unpack_rejects_traversal() {
        let mut header = tar::Header::new_gnu();
        header.set_size(4);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        // Bypass the builder's own path validation
        header.as_gnu_mut().unwrap().name[..9].copy_from_slice(b"../escape");
        header.set_cksum();

        let mut builder = tar::Builder::new(Vec::new());
        builder.append(&header, &b"evil"[..]).unwrap();
        let bytes = builder.into_inner().unwrap();

        let dst = TempDir::new().unwrap();
        let err = unpack(&bytes, &dst.path().join("root")).unwrap_err();
        assert!(matches!(err, XplatError::PathTraversal(_)));
        assert!(!dst.path().join("escape").exists());
    }
}
