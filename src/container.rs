//! Immutable container definitions
//!
//! A [`Container`] is a persistent value: every builder method returns a new
//! container and leaves the receiver untouched. Deriving from a container
//! with a pending command makes that container the parent, so chains form a
//! DAG that the engine evaluates parent first.

use crate::cache::{validate_mount_path, CacheVolume};
use crate::error::XplatResult;
use crate::exec::ExecReport;
use crate::platform::Platform;
use crate::store::ContentRef;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A command waiting to be executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    pub args: Vec<String>,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.args.join(" "))
    }
}

/// What a container's root filesystem derives from
#[derive(Debug, Clone)]
pub enum Base {
    /// A stored tree
    Rootfs(ContentRef),
    /// The output of another container's pending command
    Parent(Container),
}

/// Content bound at a mount point
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSource {
    /// A stored tree, copied in for each command and snapshotted after it
    Directory(ContentRef),
    /// A live cache volume
    Cache(CacheVolume),
}

/// A mount point inside a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Normalized absolute path inside the container
    pub path: String,
    pub source: MountSource,
}

impl Mount {
    /// Relative remainder of `path` if it lies at or below this mount
    pub fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.path.as_str())?;
        if rest.is_empty() {
            Some("/")
        } else if rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}

#[derive(Debug)]
struct Node {
    platform: Platform,
    base: Base,
    env: BTreeMap<String, String>,
    workdir: Option<String>,
    mounts: Vec<Mount>,
    pending_exec: Option<Command>,
    last_exec: Option<Arc<ExecReport>>,
    digest: String,
}

/// Immutable, cheaply clonable container definition
#[derive(Debug, Clone)]
pub struct Container(Arc<Node>);

#[derive(Serialize)]
struct Definition<'a> {
    platform: &'a Platform,
    rootfs: Option<&'a ContentRef>,
    parent: Option<&'a str>,
    env: &'a BTreeMap<String, String>,
    workdir: &'a Option<String>,
    mounts: Vec<MountDefinition<'a>>,
    exec: Option<&'a Command>,
}

#[derive(Serialize)]
struct MountDefinition<'a> {
    path: &'a str,
    directory: Option<&'a ContentRef>,
    cache: Option<&'a str>,
}

fn definition_digest(
    platform: &Platform,
    base: &Base,
    env: &BTreeMap<String, String>,
    workdir: &Option<String>,
    mounts: &[Mount],
    pending_exec: Option<&Command>,
) -> String {
    let (rootfs, parent) = match base {
        Base::Rootfs(r) => (Some(r), None),
        Base::Parent(p) => (None, Some(p.digest())),
    };
    let definition = Definition {
        platform,
        rootfs,
        parent,
        env,
        workdir,
        mounts: mounts
            .iter()
            .map(|m| MountDefinition {
                path: &m.path,
                directory: match m.source {
                    MountSource::Directory(ref r) => Some(r),
                    MountSource::Cache(_) => None,
                },
                cache: match m.source {
                    MountSource::Cache(ref v) => Some(v.name.as_str()),
                    MountSource::Directory(_) => None,
                },
            })
            .collect(),
        exec: pending_exec,
    };
    // Serializing borrowed strings and maps cannot fail
    let bytes = serde_json::to_vec(&definition).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

impl Container {
    /// A container for `platform` rooted at a stored tree
    pub fn new(platform: Platform, rootfs: ContentRef) -> Self {
        Self::build(
            platform,
            Base::Rootfs(rootfs),
            BTreeMap::new(),
            None,
            Vec::new(),
            None,
            None,
        )
    }

    fn build(
        platform: Platform,
        base: Base,
        env: BTreeMap<String, String>,
        workdir: Option<String>,
        mounts: Vec<Mount>,
        pending_exec: Option<Command>,
        last_exec: Option<Arc<ExecReport>>,
    ) -> Self {
        let digest = definition_digest(&platform, &base, &env, &workdir, &mounts, pending_exec.as_ref());
        Self(Arc::new(Node {
            platform,
            base,
            env,
            workdir,
            mounts,
            pending_exec,
            last_exec,
            digest,
        }))
    }

    /// An evaluated container: no pending command, rooted at a stored tree
    pub(crate) fn resolved(
        platform: Platform,
        rootfs: ContentRef,
        env: BTreeMap<String, String>,
        workdir: Option<String>,
        mounts: Vec<Mount>,
        last_exec: Option<Arc<ExecReport>>,
    ) -> Self {
        Self::build(platform, Base::Rootfs(rootfs), env, workdir, mounts, None, last_exec)
    }

    /// Derive a new container, applying `edit` to a copy of the definition.
    ///
    /// A pending command on `self` turns `self` into the parent.
    fn derive(&self, edit: impl FnOnce(&mut Draft)) -> Self {
        let node = &self.0;
        let (base, last_exec) = if node.pending_exec.is_some() {
            (Base::Parent(self.clone()), None)
        } else {
            (node.base.clone(), node.last_exec.clone())
        };
        let mut draft = Draft {
            base,
            env: node.env.clone(),
            workdir: node.workdir.clone(),
            mounts: node.mounts.clone(),
            pending_exec: None,
        };
        edit(&mut draft);
        Self::build(
            node.platform.clone(),
            draft.base,
            draft.env,
            draft.workdir,
            draft.mounts,
            draft.pending_exec,
            last_exec,
        )
    }

    /// Queue a command
    pub fn with_exec<I, S>(&self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        self.derive(|d| d.pending_exec = Some(Command { args }))
    }

    /// Set an environment variable for later commands
    pub fn with_env(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let (key, value) = (key.into(), value.into());
        self.derive(|d| {
            d.env.insert(key, value);
        })
    }

    /// Set the working directory for later commands
    pub fn with_workdir(&self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.derive(|d| d.workdir = Some(path))
    }

    /// Replace the root filesystem, keeping env, workdir and mounts
    pub fn with_rootfs(&self, rootfs: ContentRef) -> Self {
        self.derive(|d| d.base = Base::Rootfs(rootfs))
    }

    /// Mount a stored tree at `path`
    pub fn with_mounted_directory(&self, path: &str, content: ContentRef) -> XplatResult<Self> {
        let path = validate_mount_path(path)?;
        Ok(self.derive(|d| d.set_mount(path, MountSource::Directory(content))))
    }

    /// Mount a cache volume read-write at `path`.
    ///
    /// The container's platform plays no part in which volume is mounted.
    pub fn with_mounted_cache(&self, path: &str, volume: &CacheVolume) -> XplatResult<Self> {
        let path = validate_mount_path(path)?;
        let source = MountSource::Cache(volume.clone());
        Ok(self.derive(|d| d.set_mount(path, source)))
    }

    pub fn platform(&self) -> &Platform {
        &self.0.platform
    }

    pub fn base(&self) -> &Base {
        &self.0.base
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.0.env
    }

    pub fn workdir(&self) -> Option<&str> {
        self.0.workdir.as_deref()
    }

    pub fn mounts(&self) -> &[Mount] {
        &self.0.mounts
    }

    pub fn pending_exec(&self) -> Option<&Command> {
        self.0.pending_exec.as_ref()
    }

    /// Report of the most recent executed command, if evaluated
    pub fn last_exec(&self) -> Option<&ExecReport> {
        self.0.last_exec.as_deref()
    }

    pub(crate) fn last_exec_shared(&self) -> Option<Arc<ExecReport>> {
        self.0.last_exec.clone()
    }

    /// Root filesystem ref when the container is rooted at a stored tree
    pub fn rootfs(&self) -> Option<&ContentRef> {
        match self.0.base {
            Base::Rootfs(ref r) => Some(r),
            Base::Parent(_) => None,
        }
    }

    /// True once nothing remains to evaluate
    pub fn is_resolved(&self) -> bool {
        self.0.pending_exec.is_none() && matches!(self.0.base, Base::Rootfs(_))
    }

    /// Definition digest, the container's identity for memoized evaluation
    pub fn digest(&self) -> &str {
        &self.0.digest
    }
}

struct Draft {
    base: Base,
    env: BTreeMap<String, String>,
    workdir: Option<String>,
    mounts: Vec<Mount>,
    pending_exec: Option<Command>,
}

impl Draft {
    fn set_mount(&mut self, path: String, source: MountSource) {
        self.mounts.retain(|m| m.path != path);
        self.mounts.push(Mount { path, source });
        self.mounts.sort_by(|a, b| a.path.cmp(&b.path));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    fn root(n: u8) -> ContentRef {
        ContentRef::from_hex(&format!("{:02x}", n).repeat(32)).unwrap()
    }

    fn base() -> Container {
        Container::new(Platform::parse("linux/arm64").unwrap(), root(1))
    }

    #[test]
    fn builders_do_not_mutate() {
        let a = base();
        let b = a.with_env("A", "1");
        assert!(a.env().is_empty());
        assert_eq!(b.env().get("A").map(String::as_str), Some("1"));
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn exec_then_derive_creates_parent_edge() {
        let a = base().with_exec(["make"]);
        assert!(!a.is_resolved());
        assert!(a.rootfs().is_some());

        let b = a.with_exec(["make", "install"]);
        match b.base() {
            Base::Parent(p) => assert_eq!(p.digest(), a.digest()),
            Base::Rootfs(_) => panic!("expected parent edge"),
        }
        assert_eq!(b.pending_exec().unwrap().to_string(), "make install");
        assert_eq!(b.platform().to_string(), "linux/arm64");
    }

    #[test]
    fn digest_is_deterministic() {
        let a = base().with_workdir("/src").with_exec(["ls"]);
        let b = base().with_workdir("/src").with_exec(["ls"]);
        assert_eq!(a.digest(), b.digest());

        let other_platform =
            Container::new(Platform::parse("linux/amd64").unwrap(), root(1)).with_workdir("/src").with_exec(["ls"]);
        assert_ne!(a.digest(), other_platform.digest());
    }

    #[test]
    fn mounts_validate_and_replace() {
        let c = base().with_mounted_directory("/out", root(2)).unwrap();
        let c = c.with_mounted_directory("/out/", root(3)).unwrap();
        assert_eq!(c.mounts().len(), 1);
        assert_eq!(c.mounts()[0].source, MountSource::Directory(root(3)));

        assert!(base().with_mounted_directory("relative", root(2)).is_err());
        assert!(base().with_mounted_directory("/", root(2)).is_err());
    }

    #[test]
    fn cache_mount_identity_is_name() {
        let volume = CacheVolume {
            name: "shared".to_string(),
            path: PathBuf::from("/state/volumes/shared/data"),
            created_at: Utc::now(),
        };
        let amd = Container::new(Platform::parse("linux/amd64").unwrap(), root(1))
            .with_mounted_cache("/cache", &volume)
            .unwrap();
        let s390 = Container::new(Platform::parse("linux/s390x").unwrap(), root(1))
            .with_mounted_cache("/cache", &volume)
            .unwrap();
        assert_eq!(amd.mounts()[0].source, s390.mounts()[0].source);
        assert!(amd.with_mounted_cache("/a/../b", &volume).is_err());
    }

    #[test]
    fn with_rootfs_drops_parent() {
        let c = base().with_exec(["build"]).with_rootfs(root(9));
        assert_eq!(c.rootfs(), Some(&root(9)));
        assert!(c.is_resolved());
    }

    #[test]
    fn mount_strip() {
        let m = Mount {
            path: "/out".to_string(),
            source: MountSource::Directory(root(1)),
        };
        assert_eq!(m.strip("/out"), Some("/"));
        assert_eq!(m.strip("/out/bin"), Some("/bin"));
        assert_eq!(m.strip("/output"), None);
        assert_eq!(m.strip("/etc"), None);
    }
}
