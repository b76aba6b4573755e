//! Content-addressed filesystem store
//!
//! Filesystem trees are stored by their tree digest:
//!
//! ```text
//! <state>/store/
//! ├── snapshots/
//! │   └── <hex>/      (immutable tree)
//! └── tmp/
//!     └── <uuid>/     (in-flight copies, renamed into snapshots/)
//! ```
//!
//! Snapshots are written to a unique temp directory and atomically renamed
//! into place, so concurrent snapshots of the same tree are safe.

pub mod archive;
pub mod tree;

use crate::error::{XplatError, XplatResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Identifier of a filesystem tree in the content store (`sha256:<hex>`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentRef(String);

impl ContentRef {
    /// Build a ref from a hex sha256 digest
    pub fn from_hex(hex: &str) -> XplatResult<Self> {
        Self::parse(&format!("sha256:{}", hex))
    }

    /// Parse `sha256:<64 hex>`
    pub fn parse(s: &str) -> XplatResult<Self> {
        let hex = s
            .strip_prefix("sha256:")
            .ok_or_else(|| XplatError::ContentNotFound(format!("{} is not a sha256 digest", s)))?;
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(XplatError::ContentNotFound(format!(
                "{} is not a sha256 digest",
                s
            )));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Hex part of the digest
    pub fn hex(&self) -> &str {
        &self.0["sha256:".len()..]
    }

    /// Short form for display
    pub fn short(&self) -> &str {
        &self.hex()[..12]
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentRef {
    type Err = XplatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContentRef {
    type Error = XplatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentRef> for String {
    fn from(r: ContentRef) -> Self {
        r.0
    }
}

/// Run a blocking store operation on the blocking pool
pub async fn run_blocking<T, F>(operation: F) -> XplatResult<T>
where
    F: FnOnce() -> XplatResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(operation)
        .await
        .map_err(|e| XplatError::Internal(format!("store task failed: {}", e)))?
}

/// Statistics from a garbage collection run
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    pub removed_count: u64,
    pub freed_bytes: u64,
}

/// Content-addressed store of immutable filesystem trees
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> XplatResult<Self> {
        let root = root.into();
        for dir in [root.join("snapshots"), root.join("tmp")] {
            fs::create_dir_all(&dir)
                .map_err(|e| XplatError::io(format!("creating {}", dir.display()), e))?;
        }
        debug!("Content store at {}", root.display());
        Ok(Self { root })
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn snapshot_path(&self, content: &ContentRef) -> PathBuf {
        self.root.join("snapshots").join(content.hex())
    }

    /// A fresh, unique scratch directory path under the store (not created)
    pub fn scratch_path(&self, prefix: &str) -> PathBuf {
        self.root
            .join("tmp")
            .join(format!("{}-{}", prefix, uuid::Uuid::new_v4()))
    }

    /// Check whether a tree is present
    pub fn has(&self, content: &ContentRef) -> bool {
        self.snapshot_path(content).is_dir()
    }

    /// Snapshot a directory into the store
    pub fn snapshot(&self, dir: &Path) -> XplatResult<ContentRef> {
        if !dir.is_dir() {
            return Err(XplatError::PathNotFound(dir.to_path_buf()));
        }

        let content = ContentRef::from_hex(&tree::digest_tree(dir)?)?;
        let target = self.snapshot_path(&content);
        if target.exists() {
            debug!("Snapshot {} already present", content.short());
            return Ok(content);
        }

        let temp = self.scratch_path("snap");
        tree::copy_tree(dir, &temp)?;
        if let Err(e) = fs::rename(&temp, &target) {
            tree::remove_tree(&temp)?;
            if !target.exists() {
                return Err(XplatError::io(format!("storing snapshot {}", content), e));
            }
        }

        debug!("Stored snapshot {} from {}", content.short(), dir.display());
        Ok(content)
    }

    /// The ref of an empty tree
    pub fn empty(&self) -> XplatResult<ContentRef> {
        let temp = self.scratch_path("empty");
        fs::create_dir_all(&temp)
            .map_err(|e| XplatError::io(format!("creating {}", temp.display()), e))?;
        let result = self.snapshot(&temp);
        tree::remove_tree(&temp)?;
        result
    }

    /// Copy a stored tree into `dest` as a writable working copy
    pub fn materialize(&self, content: &ContentRef, dest: &Path) -> XplatResult<()> {
        let src = self.require(content)?;
        tree::copy_tree(&src, dest)
    }

    fn require(&self, content: &ContentRef) -> XplatResult<PathBuf> {
        let path = self.snapshot_path(content);
        if path.is_dir() {
            Ok(path)
        } else {
            Err(XplatError::ContentNotFound(content.to_string()))
        }
    }

    fn resolve_in(&self, content: &ContentRef, path: &str) -> XplatResult<PathBuf> {
        let base = self.require(content)?;
        tree::resolve_within(&base, path).map_err(|e| match e {
            XplatError::ContentNotFound(_) => {
                XplatError::ContentNotFound(format!("{} in {}", path, content))
            }
            other => other,
        })
    }

    /// Sorted entry names of the directory at `path` inside a tree
    pub fn entries(&self, content: &ContentRef, path: &str) -> XplatResult<Vec<String>> {
        let dir = self.resolve_in(content, path)?;
        if !dir.is_dir() {
            return Err(XplatError::PathInvalid {
                path: PathBuf::from(path),
                reason: "not a directory".to_string(),
            });
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)
            .map_err(|e| XplatError::io(format!("reading {}", dir.display()), e))?
        {
            let entry = entry.map_err(|e| XplatError::io(format!("reading {}", dir.display()), e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    /// Read a regular file inside a tree
    pub fn read_file(&self, content: &ContentRef, path: &str) -> XplatResult<Vec<u8>> {
        let file = self.resolve_in(content, path)?;
        if !file.is_file() {
            return Err(XplatError::PathInvalid {
                path: PathBuf::from(path),
                reason: "not a regular file".to_string(),
            });
        }
        fs::read(&file).map_err(|e| XplatError::io(format!("reading {}", file.display()), e))
    }

    /// Ref of the subdirectory at `path` inside a tree
    pub fn subtree(&self, content: &ContentRef, path: &str) -> XplatResult<ContentRef> {
        let dir = self.resolve_in(content, path)?;
        if !dir.is_dir() {
            return Err(XplatError::PathInvalid {
                path: PathBuf::from(path),
                reason: "not a directory".to_string(),
            });
        }
        self.snapshot(&dir)
    }

    /// Total size of files in a tree
    pub fn size(&self, content: &ContentRef) -> XplatResult<u64> {
        tree::tree_size(&self.require(content)?)
    }

    /// Export a tree as a deterministic uncompressed tar archive
    pub fn export_tar(&self, content: &ContentRef) -> XplatResult<Vec<u8>> {
        archive::pack(&self.require(content)?)
    }

    /// Import a tar archive as a new tree
    pub fn import_tar(&self, bytes: &[u8]) -> XplatResult<ContentRef> {
        let temp = self.scratch_path("import");
        let result = archive::unpack(bytes, &temp).and_then(|()| self.snapshot(&temp));
        tree::remove_tree(&temp)?;
        result
    }

    /// All stored trees
    pub fn list(&self) -> XplatResult<Vec<ContentRef>> {
        let dir = self.root.join("snapshots");
        let mut refs = Vec::new();
        for entry in fs::read_dir(&dir)
            .map_err(|e| XplatError::io(format!("reading {}", dir.display()), e))?
        {
            let entry = entry.map_err(|e| XplatError::io(format!("reading {}", dir.display()), e))?;
            if let Ok(content) = ContentRef::from_hex(&entry.file_name().to_string_lossy()) {
                refs.push(content);
            }
        }
        refs.sort();
        Ok(refs)
    }

    /// Remove every tree not in `keep`, plus leftover scratch directories
    pub fn gc(&self, keep: &[ContentRef]) -> XplatResult<GcStats> {
        let mut stats = GcStats::default();

        for content in self.list()? {
            if keep.contains(&content) {
                continue;
            }
            let path = self.snapshot_path(&content);
            stats.freed_bytes += tree::tree_size(&path).unwrap_or(0);
            tree::remove_tree(&path)?;
            stats.removed_count += 1;
        }

        let tmp = self.root.join("tmp");
        tree::remove_tree(&tmp)?;
        fs::create_dir_all(&tmp).map_err(|e| XplatError::io(format!("creating {}", tmp.display()), e))?;

        info!(
            "Store GC: removed {} trees, freed {} bytes",
            stats.removed_count, stats.freed_bytes
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> ContentStore {
        ContentStore::open(temp.path().join("store")).unwrap()
    }

    fn windows_root(dir: &Path) {
        for name in ["Windows", "Users", "ProgramData"] {
            fs::create_dir_all(dir.join(name)).unwrap();
        }
        fs::write(dir.join("License.txt"), "license").unwrap();
    }

    #[test]
    fn content_ref_parse() {
        let hex = "a".repeat(64);
        let r = ContentRef::parse(&format!("sha256:{}", hex)).unwrap();
        assert_eq!(r.hex(), hex);
        assert_eq!(r.short(), "aaaaaaaaaaaa");
        assert!(ContentRef::parse("sha256:../../etc").is_err());
        assert!(ContentRef::parse("md5:abc").is_err());
    }

    #[test]
    fn snapshot_dedups() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let src = temp.path().join("src");
        windows_root(&src);

        let a = store.snapshot(&src).unwrap();
        let b = store.snapshot(&src).unwrap();
        assert_eq!(a, b);
        assert!(store.has(&a));
        assert_eq!(store.list().unwrap(), vec![a]);
    }

    #[test]
    fn entries_are_sorted() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let src = temp.path().join("src");
        windows_root(&src);

        let root = store.snapshot(&src).unwrap();
        assert_eq!(
            store.entries(&root, "/").unwrap(),
            vec!["License.txt", "ProgramData", "Users", "Windows"]
        );
        assert!(store.entries(&root, "/missing").is_err());
        assert!(store.entries(&root, "/License.txt").is_err());
    }

    #[test]
    fn read_file_and_subtree() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("out")).unwrap();
        fs::write(src.join("out/a.txt"), "a").unwrap();

        let root = store.snapshot(&src).unwrap();
        assert_eq!(store.read_file(&root, "/out/a.txt").unwrap(), b"a");

        let sub = store.subtree(&root, "/out").unwrap();
        assert_eq!(store.entries(&sub, "/").unwrap(), vec!["a.txt"]);
    }

    #[test]
    fn materialize_round_trips() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let src = temp.path().join("src");
        windows_root(&src);

        let root = store.snapshot(&src).unwrap();
        let work = temp.path().join("work");
        store.materialize(&root, &work).unwrap();
        fs::write(work.join("scratch"), "x").unwrap();

        // Working copies never alter the stored tree
        assert_eq!(store.snapshot(&src).unwrap(), root);
        assert_ne!(store.snapshot(&work).unwrap(), root);
    }

    #[test]
    fn tar_round_trip_preserves_ref() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let src = temp.path().join("src");
        windows_root(&src);

        let root = store.snapshot(&src).unwrap();
        let bytes = store.export_tar(&root).unwrap();
        assert_eq!(bytes, store.export_tar(&root).unwrap());
        assert_eq!(store.import_tar(&bytes).unwrap(), root);
    }

    #[test]
    fn empty_tree_has_no_entries() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let empty = store.empty().unwrap();
        assert!(store.entries(&empty, "/").unwrap().is_empty());
    }

    #[test]
    fn gc_keeps_referenced() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let a_dir = temp.path().join("a");
        let b_dir = temp.path().join("b");
        windows_root(&a_dir);
        fs::create_dir_all(&b_dir).unwrap();
        fs::write(b_dir.join("b"), "bbb").unwrap();

        let a = store.snapshot(&a_dir).unwrap();
        let b = store.snapshot(&b_dir).unwrap();

        let stats = store.gc(&[a.clone()]).unwrap();
        assert_eq!(stats.removed_count, 1);
        assert_eq!(stats.freed_bytes, 3);
        assert!(store.has(&a));
        assert!(!store.has(&b));
    }

    #[cfg(unix)]
    #[test]
    fn image_symlinks_stay_inside_the_tree() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let host_only = temp.path().join("host_only");
        fs::create_dir_all(&host_only).unwrap();
        fs::write(host_only.join("secret.txt"), "host data").unwrap();

        let src = temp.path().join("src");
        fs::create_dir_all(src.join("bin")).unwrap();
        fs::write(src.join("bin/busybox"), "busybox").unwrap();
        tree::create_symlink(Path::new("/bin/busybox"), &src.join("bin/sh")).unwrap();
        tree::create_symlink(&host_only, &src.join("link")).unwrap();
        tree::create_symlink(Path::new("../.."), &src.join("bin/up")).unwrap();

        let root = store.snapshot(&src).unwrap();

        assert!(store.entries(&root, "/link").is_err());
        assert!(store.read_file(&root, "/link/secret.txt").is_err());
        assert!(store.subtree(&root, "/link").is_err());

        // Absolute targets resolve against the tree root
        assert_eq!(store.read_file(&root, "/bin/sh").unwrap(), b"busybox");
        // `..` stops at the tree root
        assert_eq!(
            store.entries(&root, "/bin/up").unwrap(),
            vec!["bin", "link"]
        );
        let up = store.subtree(&root, "/bin/up").unwrap();
        assert_eq!(up, root);
    }
}
