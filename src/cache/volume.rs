//! Named cache volumes
//!
//! A cache volume is a named, persistent directory that any container can
//! mount read-write, regardless of its platform. The name is the whole
//! identity: `go-build` mounted by a linux/amd64 build and a linux/s390x
//! build is the same directory.

use crate::error::{XplatError, XplatResult};
use crate::store::{tree, ContentRef, ContentStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

const METADATA_FILE: &str = "volume.json";
const DATA_DIR: &str = "data";

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Validate a cache volume name: `[A-Za-z0-9._-]+`, no `..`
pub fn validate_name(name: &str) -> XplatResult<()> {
    let invalid = |reason: &str| XplatError::CacheVolumeInvalid {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if name.contains("..") {
        return Err(invalid("name must not contain '..'"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(invalid("only letters, digits, '.', '_' and '-' are allowed"));
    }
    Ok(())
}

/// Validate an in-container mount path and return its normalized form.
///
/// The path must be absolute, must not contain `..` and must not be `/`.
pub fn validate_mount_path(path: &str) -> XplatResult<String> {
    let invalid = |reason: &str| XplatError::PathInvalid {
        path: PathBuf::from(path),
        reason: reason.to_string(),
    };

    if !path.starts_with('/') {
        return Err(invalid("mount path must be absolute"));
    }

    let mut parts = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::ParentDir | Component::Prefix(_) => {
                return Err(invalid("mount path must not contain '..'"));
            }
        }
    }

    if parts.is_empty() {
        return Err(invalid("cannot mount over the container root"));
    }

    Ok(format!("/{}", parts.join("/")))
}

/// Persistent metadata stored next to the volume data
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VolumeMetadata {
    name: String,
    created_at: DateTime<Utc>,
}

/// A named cache volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheVolume {
    /// Volume name (the whole identity)
    pub name: String,
    /// Host directory holding the volume's contents
    pub path: PathBuf,
    /// When the volume was first referenced
    pub created_at: DateTime<Utc>,
}

impl CacheVolume {
    /// Check if this volume is older than the given number of days
    pub fn is_older_than_days(&self, days: u32) -> bool {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        self.created_at < cutoff
    }
}

/// Registry of cache volumes under `<state>/volumes`
#[derive(Debug, Clone)]
pub struct CacheVolumes {
    root: PathBuf,
}

impl CacheVolumes {
    /// Open (creating if needed) the volume root
    pub fn open(root: impl Into<PathBuf>) -> XplatResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| XplatError::io(format!("creating {}", root.display()), e))?;
        Ok(Self { root })
    }

    fn volume_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Get a volume by name, creating it on first reference
    pub fn volume(&self, name: &str) -> XplatResult<CacheVolume> {
        validate_name(name)?;
        let dir = self.volume_dir(name);
        let data = dir.join(DATA_DIR);
        fs::create_dir_all(&data)
            .map_err(|e| XplatError::io(format!("creating cache volume {}", name), e))?;

        let meta_path = dir.join(METADATA_FILE);
        if !meta_path.exists() {
            let meta = VolumeMetadata {
                name: name.to_string(),
                created_at: Utc::now(),
            };
            let temp = dir.join(format!("{}.{}", METADATA_FILE, uuid::Uuid::new_v4()));
            fs::write(&temp, serde_json::to_vec_pretty(&meta)?)
                .map_err(|e| XplatError::io(format!("writing {}", temp.display()), e))?;
            fs::rename(&temp, &meta_path)
                .map_err(|e| XplatError::io(format!("writing {}", meta_path.display()), e))?;
            debug!("Created cache volume {}", name);
        }

        self.get(name)
    }

    /// Get an existing volume without creating it
    pub fn get(&self, name: &str) -> XplatResult<CacheVolume> {
        validate_name(name)?;
        let dir = self.volume_dir(name);
        let meta_path = dir.join(METADATA_FILE);
        if !meta_path.exists() {
            return Err(XplatError::CacheVolumeNotFound(name.to_string()));
        }

        let raw = fs::read(&meta_path)
            .map_err(|e| XplatError::io(format!("reading {}", meta_path.display()), e))?;
        let meta: VolumeMetadata = serde_json::from_slice(&raw)?;

        Ok(CacheVolume {
            name: meta.name,
            path: dir.join(DATA_DIR),
            created_at: meta.created_at,
        })
    }

    /// All volumes, sorted by name
    pub fn list(&self) -> XplatResult<Vec<CacheVolume>> {
        let mut volumes = Vec::new();
        for entry in fs::read_dir(&self.root)
            .map_err(|e| XplatError::io(format!("reading {}", self.root.display()), e))?
        {
            let entry = entry.map_err(|e| XplatError::io("reading cache volumes", e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.get(&name) {
                Ok(volume) => volumes.push(volume),
                Err(e) => debug!("Skipping {}: {}", name, e),
            }
        }
        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(volumes)
    }

    /// Delete a volume and its contents
    pub fn remove(&self, name: &str) -> XplatResult<()> {
        self.get(name)?;
        tree::remove_tree(&self.volume_dir(name))?;
        debug!("Removed cache volume {}", name);
        Ok(())
    }

    /// Total size of a volume's contents
    pub fn size(&self, name: &str) -> XplatResult<u64> {
        tree::tree_size(&self.get(name)?.path)
    }

    /// Current contents of a volume as a content ref
    pub fn snapshot(&self, name: &str, store: &ContentStore) -> XplatResult<ContentRef> {
        store.snapshot(&self.get(name)?.path)
    }
}
