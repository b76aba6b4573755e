//! Filesystem tree walking, digesting and copying
//!
//! A tree digest covers every entry's relative path, kind, permission bits
//! and content (file bytes or symlink target). Timestamps and ownership are
//! not part of it.

use crate::error::{XplatError, XplatResult};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Kind of a tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
}

impl EntryKind {
    fn tag(&self) -> &'static str {
        match self {
            Self::Dir => "d",
            Self::File => "f",
            Self::Symlink => "l",
        }
    }
}

/// One entry of a walked tree
#[derive(Debug, Clone)]
pub struct TreeEntry {
    /// Path relative to the tree root, `/` separated
    pub rel: String,
    pub kind: EntryKind,
    /// Permission bits (`0o7777` mask)
    pub mode: u32,
    /// Symlink target
    pub target: Option<String>,
    /// File size in bytes
    pub size: u64,
}

fn walk_error(root: &Path, error: walkdir::Error) -> XplatError {
    let context = match error.path() {
        Some(path) => format!("walking {}", path.display()),
        None => format!("walking {}", root.display()),
    };
    XplatError::io(context, io::Error::from(error))
}

/// Walk a tree depth first, siblings in file name order.
///
/// Symlinks are reported, never followed.
pub fn walk(root: &Path) -> XplatResult<Vec<TreeEntry>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1)
    {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        let path = entry.path();
        let rel = relative_string(root, path);
        let file_type = entry.file_type();

        if file_type.is_symlink() {
            let target = fs::read_link(path)
                .map_err(|e| XplatError::io(format!("readlink {}", path.display()), e))?;
            entries.push(TreeEntry {
                rel,
                kind: EntryKind::Symlink,
                mode: 0o777,
                target: Some(target.to_string_lossy().into_owned()),
                size: 0,
            });
            continue;
        }

        let meta = entry.metadata().map_err(|e| walk_error(root, e))?;
        if file_type.is_dir() {
            entries.push(TreeEntry {
                rel,
                kind: EntryKind::Dir,
                mode: permission_bits(&meta),
                target: None,
                size: 0,
            });
        } else if file_type.is_file() {
            entries.push(TreeEntry {
                rel,
                kind: EntryKind::File,
                mode: permission_bits(&meta),
                target: None,
                size: meta.len(),
            });
        }
        // Sockets, fifos and devices are not part of a snapshot
    }

    Ok(entries)
}

fn relative_string(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn permission_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &fs::Metadata) -> u32 {
    if meta.is_dir() {
        0o755
    } else if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Compute the hex sha256 tree digest of a directory
pub fn digest_tree(root: &Path) -> XplatResult<String> {
    let entries = walk(root)?;
    let mut hasher = Sha256::new();

    for entry in &entries {
        let content = match entry.kind {
            EntryKind::Dir => String::new(),
            EntryKind::Symlink => entry.target.clone().unwrap_or_default(),
            EntryKind::File => digest_file(&root.join(&entry.rel))?,
        };
        hasher.update(entry.kind.tag().as_bytes());
        hasher.update(format!(" {:o} ", entry.mode).as_bytes());
        hasher.update(entry.rel.as_bytes());
        hasher.update([0u8]);
        hasher.update(content.as_bytes());
        hasher.update(b"\n");
    }

    Ok(hex::encode(hasher.finalize()))
}

fn digest_file(path: &Path) -> XplatResult<String> {
    let mut file = fs::File::open(path)
        .map_err(|e| XplatError::io(format!("opening {}", path.display()), e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .map_err(|e| XplatError::io(format!("hashing {}", path.display()), e))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Copy `src` into `dst`, preserving permission bits and symlinks.
///
/// Directory permissions are applied after their children are written so
/// read-only directories can be copied.
pub fn copy_tree(src: &Path, dst: &Path) -> XplatResult<()> {
    let mut dirs = Vec::new();

    for entry in WalkDir::new(src).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| walk_error(src, e))?;
        let from = entry.path();
        let to = dst.join(from.strip_prefix(src).unwrap_or(from));
        let file_type = entry.file_type();

        if file_type.is_symlink() {
            let target = fs::read_link(from)
                .map_err(|e| XplatError::io(format!("readlink {}", from.display()), e))?;
            create_symlink(&target, &to)?;
        } else if file_type.is_dir() {
            fs::create_dir_all(&to)
                .map_err(|e| XplatError::io(format!("creating {}", to.display()), e))?;
            let meta = entry.metadata().map_err(|e| walk_error(src, e))?;
            dirs.push((to, meta.permissions()));
        } else if file_type.is_file() {
            fs::copy(from, &to).map_err(|e| {
                XplatError::io(format!("copying {} to {}", from.display(), to.display()), e)
            })?;
        }
    }

    // Deepest first
    for (dir, permissions) in dirs.into_iter().rev() {
        fs::set_permissions(&dir, permissions)
            .map_err(|e| XplatError::io(format!("chmod {}", dir.display()), e))?;
    }

    Ok(())
}

#[cfg(unix)]
pub(crate) fn create_symlink(target: &Path, link: &Path) -> XplatResult<()> {
    std::os::unix::fs::symlink(target, link)
        .map_err(|e| XplatError::io(format!("symlink {}", link.display()), e))
}

#[cfg(not(unix))]
pub(crate) fn create_symlink(target: &Path, link: &Path) -> XplatResult<()> {
    Err(XplatError::PathInvalid {
        path: link.to_path_buf(),
        reason: format!("symlinks to {} are not supported on this host", target.display()),
    })
}

/// Remove a tree, restoring write permission on directories first
pub fn remove_tree(path: &Path) -> XplatResult<()> {
    if !path.exists() {
        return Ok(());
    }
    make_writable(path)?;
    fs::remove_dir_all(path).map_err(|e| XplatError::io(format!("removing {}", path.display()), e))
}

#[cfg(unix)]
fn make_writable(root: &Path) -> XplatResult<()> {
    use std::os::unix::fs::PermissionsExt;

    for entry in WalkDir::new(root)
        .follow_links(false)
        .contents_first(true)
    {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let path = entry.path();
        let mode = entry.metadata().map_err(|e| walk_error(root, e))?.permissions().mode();
        if mode & 0o700 != 0o700 {
            fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o700))
                .map_err(|e| XplatError::io(format!("chmod {}", path.display()), e))?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_writable(_dir: &Path) -> XplatResult<()> {
    Ok(())
}

/// Total size in bytes of regular files under `root`
pub fn tree_size(root: &Path) -> XplatResult<u64> {
    Ok(walk(root)?.iter().map(|e| e.size).sum())
}

/// Convert an in-container path (`/usr/bin`, `etc/`) into a path relative
/// to a tree root. `..` components are rejected.
pub fn container_relative(path: &str) -> XplatResult<PathBuf> {
    let mut rel = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(part) => rel.push(part),
            Component::ParentDir | Component::Prefix(_) => {
                return Err(XplatError::PathInvalid {
                    path: PathBuf::from(path),
                    reason: "path must not contain '..'".to_string(),
                });
            }
        }
    }
    Ok(rel)
}

/// Symlink hops allowed while resolving one path
const MAX_LINK_HOPS: usize = 40;

enum Step {
    Parent,
    Name(OsString),
}

fn push_steps(stack: &mut Vec<Step>, path: &Path) {
    // Pushed in reverse so the first component is popped first
    for component in path.components().rev() {
        match component {
            Component::ParentDir => stack.push(Step::Parent),
            Component::Normal(part) => stack.push(Step::Name(part.to_os_string())),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
}

/// Resolve an in-container path against a tree root the way a chroot would.
///
/// Symlinks are followed with absolute targets taken relative to `root`, and
/// `..` never climbs above `root`. The returned host path is never a symlink
/// and always lies inside `root`.
pub fn resolve_within(root: &Path, path: &str) -> XplatResult<PathBuf> {
    let not_found = || XplatError::ContentNotFound(format!("{} in {}", path, root.display()));

    let mut stack = Vec::new();
    push_steps(&mut stack, &container_relative(path)?);

    let mut resolved = PathBuf::new();
    let mut hops = 0;
    while let Some(step) = stack.pop() {
        let name = match step {
            Step::Parent => {
                resolved.pop();
                continue;
            }
            Step::Name(name) => name,
        };

        let candidate = root.join(&resolved).join(&name);
        let meta = fs::symlink_metadata(&candidate).map_err(|_| not_found())?;
        if !meta.file_type().is_symlink() {
            resolved.push(name);
            continue;
        }

        hops += 1;
        if hops > MAX_LINK_HOPS {
            return Err(XplatError::PathInvalid {
                path: PathBuf::from(path),
                reason: "too many levels of symbolic links".to_string(),
            });
        }
        let target = fs::read_link(&candidate)
            .map_err(|e| XplatError::io(format!("readlink {}", candidate.display()), e))?;
        if target.has_root() {
            resolved.clear();
        }
        push_steps(&mut stack, &target);
    }

    Ok(root.join(resolved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_tree(dir: &Path) {
        fs::create_dir_all(dir.join("etc")).unwrap();
        fs::write(dir.join("etc/hostname"), "xplat\n").unwrap();
        fs::write(dir.join("README"), "hello").unwrap();
    }

    #[test]
    fn walk_is_sorted() {
        let temp = TempDir::new().unwrap();
        sample_tree(temp.path());
        let rels: Vec<String> = walk(temp.path()).unwrap().into_iter().map(|e| e.rel).collect();
        assert_eq!(rels, vec!["README", "etc", "etc/hostname"]);
    }

    #[test]
    fn digest_is_stable_across_copies() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        sample_tree(a.path());
        copy_tree(a.path(), &b.path().join("copy")).unwrap();

        assert_eq!(
            digest_tree(a.path()).unwrap(),
            digest_tree(&b.path().join("copy")).unwrap()
        );
    }

    #[test]
    fn digest_changes_with_content() {
        let temp = TempDir::new().unwrap();
        sample_tree(temp.path());
        let before = digest_tree(temp.path()).unwrap();
        fs::write(temp.path().join("README"), "changed").unwrap();
        assert_ne!(before, digest_tree(temp.path()).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn copy_preserves_symlinks() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        sample_tree(&src);
        create_symlink(Path::new("etc/hostname"), &src.join("link")).unwrap();

        let dst = temp.path().join("dst");
        copy_tree(&src, &dst).unwrap();
        assert_eq!(fs::read_link(dst.join("link")).unwrap(), Path::new("etc/hostname"));
    }

    #[test]
    fn container_relative_strips_root() {
        assert_eq!(container_relative("/usr/bin").unwrap(), PathBuf::from("usr/bin"));
        assert_eq!(container_relative("/").unwrap(), PathBuf::new());
        assert!(container_relative("/usr/../etc").is_err());
    }

    #[test]
    fn tree_size_counts_files() {
        let temp = TempDir::new().unwrap();
        sample_tree(temp.path());
        assert_eq!(tree_size(temp.path()).unwrap(), 11);
    }

    #[cfg(unix)]
    #[test]
    fn walk_reports_symlinks_without_following() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        sample_tree(&src);
        let outside = temp.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("secret"), "host").unwrap();
        create_symlink(&outside, &src.join("escape")).unwrap();

        let entries = walk(&src).unwrap();
        let escape = entries.iter().find(|e| e.rel == "escape").unwrap();
        assert_eq!(escape.kind, EntryKind::Symlink);
        assert!(entries.iter().all(|e| !e.rel.contains("secret")));
    }

    #[cfg(unix)]
    #[test]
    fn copy_keeps_read_only_directories() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        sample_tree(&src);
        fs::set_permissions(src.join("etc"), fs::Permissions::from_mode(0o555)).unwrap();

        let dst = temp.path().join("dst");
        copy_tree(&src, &dst).unwrap();
        let mode = fs::metadata(dst.join("etc")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o555);
        assert_eq!(fs::read_to_string(dst.join("etc/hostname")).unwrap(), "xplat\n");

        remove_tree(&dst).unwrap();
        remove_tree(&src).unwrap();
        assert!(!dst.exists());
    }

    #[cfg(unix)]
    #[test]
    fn resolve_follows_links_inside_the_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::write(root.join("bin/busybox"), "busybox").unwrap();
        create_symlink(Path::new("/bin/busybox"), &root.join("bin/sh")).unwrap();
        create_symlink(Path::new("../bin"), &root.join("usrbin")).unwrap();

        assert_eq!(resolve_within(&root, "/bin/sh").unwrap(), root.join("bin/busybox"));
        assert_eq!(resolve_within(&root, "/usrbin/sh").unwrap(), root.join("bin/busybox"));
        assert_eq!(resolve_within(&root, "/").unwrap(), root);
    }

    #[cfg(unix)]
    #[test]
    fn resolve_never_leaves_the_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(root.join("a")).unwrap();
        let outside = temp.path().join("host_only");
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("secret.txt"), "host data").unwrap();

        create_symlink(&outside, &root.join("abs")).unwrap();
        create_symlink(Path::new("../../../.."), &root.join("a/up")).unwrap();
        create_symlink(Path::new("loop"), &root.join("loop")).unwrap();

        // Absolute target is re-rooted, and the host path does not exist in the tree
        assert!(matches!(
            resolve_within(&root, "/abs/secret.txt"),
            Err(XplatError::ContentNotFound(_))
        ));
        // `..` is clamped at the root
        assert_eq!(resolve_within(&root, "/a/up").unwrap(), root);
        assert!(matches!(
            resolve_within(&root, "/loop"),
            Err(XplatError::PathInvalid { .. })
        ));
    }
}
