//! On-disk registry
//!
//! ```text
//! <root>/
//! ├── blobs/sha256/<hex>   (layers, configs and manifests)
//! └── refs.json            (tags and manifest media types)
//! ```
//!
//! Blobs are shared across repositories; tags are keyed by
//! `repository:tag`. All writes go through a unique temp file and an atomic
//! rename.

use crate::error::{XplatError, XplatResult};
use crate::registry::manifest::{sha256_digest, verify_digest};
use crate::registry::{ImageRef, PulledManifest, Registry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Default, Serialize, Deserialize)]
struct RefTable {
    /// `repository:tag` -> manifest digest
    #[serde(default)]
    tags: BTreeMap<String, String>,
    /// manifest digest -> media type
    #[serde(default)]
    manifests: BTreeMap<String, String>,
}

/// Registry stored in a local directory
pub struct LocalRegistry {
    root: PathBuf,
    refs_lock: Mutex<()>,
}

impl LocalRegistry {
    /// Open (creating if needed) a registry rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> XplatResult<Self> {
        let root = root.into();
        let blobs = root.join("blobs").join("sha256");
        std::fs::create_dir_all(&blobs)
            .map_err(|e| XplatError::io(format!("creating {}", blobs.display()), e))?;
        Ok(Self {
            root,
            refs_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a blob; digests that are not `sha256:<hex>` are rejected
    fn blob_path(&self, digest: &str) -> XplatResult<PathBuf> {
        let hex = digest
            .strip_prefix("sha256:")
            .filter(|h| h.len() == 64 && h.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| XplatError::BlobNotFound(digest.to_string()))?;
        Ok(self.root.join("blobs").join("sha256").join(hex))
    }

    fn refs_path(&self) -> PathBuf {
        self.root.join("refs.json")
    }

    async fn write_atomic(path: &Path, data: &[u8]) -> XplatResult<()> {
        let temp = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4()));
        fs::write(&temp, data)
            .await
            .map_err(|e| XplatError::io(format!("writing {}", temp.display()), e))?;
        if let Err(e) = fs::rename(&temp, path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(XplatError::io(format!("writing {}", path.display()), e));
        }
        Ok(())
    }

    async fn load_refs(&self) -> XplatResult<RefTable> {
        let path = self.refs_path();
        match fs::read(&path).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RefTable::default()),
            Err(e) => Err(XplatError::io(format!("reading {}", path.display()), e)),
        }
    }

    async fn store_refs(&self, refs: &RefTable) -> XplatResult<()> {
        Self::write_atomic(&self.refs_path(), &serde_json::to_vec_pretty(refs)?).await
    }

    fn tag_key(image: &ImageRef, tag: &str) -> String {
        format!("{}:{}", image.repository, tag)
    }

    /// Tags recorded for a repository, sorted
    pub async fn tags(&self, image: &ImageRef) -> XplatResult<Vec<String>> {
        let prefix = format!("{}:", image.repository);
        Ok(self
            .load_refs()
            .await?
            .tags
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }
}

#[async_trait]
impl Registry for LocalRegistry {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn has_blob(&self, _image: &ImageRef, digest: &str) -> XplatResult<bool> {
        Ok(fs::try_exists(self.blob_path(digest)?).await.unwrap_or(false))
    }

    async fn push_blob(&self, image: &ImageRef, digest: &str, data: Vec<u8>) -> XplatResult<()> {
        verify_digest(digest, &data)?;
        if self.has_blob(image, digest).await? {
            debug!("Blob {} already present", digest);
            return Ok(());
        }
        Self::write_atomic(&self.blob_path(digest)?, &data).await?;
        debug!("Stored blob {} ({} bytes)", digest, data.len());
        Ok(())
    }

    async fn pull_blob(&self, _image: &ImageRef, digest: &str) -> XplatResult<Vec<u8>> {
        let path = self.blob_path(digest)?;
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(XplatError::BlobNotFound(digest.to_string()))
            }
            Err(e) => return Err(XplatError::io(format!("reading {}", path.display()), e)),
        };
        verify_digest(digest, &data)?;
        Ok(data)
    }

    async fn push_manifest(
        &self,
        image: &ImageRef,
        reference: &str,
        media_type: &str,
        data: Vec<u8>,
    ) -> XplatResult<String> {
        let digest = sha256_digest(&data);
        if reference.starts_with("sha256:") && reference != digest {
            return Err(XplatError::DigestMismatch {
                expected: reference.to_string(),
                actual: digest,
            });
        }

        self.push_blob(image, &digest, data).await?;

        let _guard = self.refs_lock.lock().await;
        let mut refs = self.load_refs().await?;
        refs.manifests.insert(digest.clone(), media_type.to_string());
        if !reference.starts_with("sha256:") {
            refs.tags.insert(Self::tag_key(image, reference), digest.clone());
        }
        self.store_refs(&refs).await?;

        debug!("Stored manifest {} as {}", digest, reference);
        Ok(digest)
    }

    async fn pull_manifest(&self, image: &ImageRef, reference: &str) -> XplatResult<PulledManifest> {
        let refs = self.load_refs().await?;
        let digest = if reference.starts_with("sha256:") {
            reference.to_string()
        } else {
            refs.tags
                .get(&Self::tag_key(image, reference))
                .cloned()
                .ok_or_else(|| XplatError::ManifestNotFound(format!("{}:{}", image.repository, reference)))?
        };

        let media_type = refs
            .manifests
            .get(&digest)
            .cloned()
            .ok_or_else(|| XplatError::ManifestNotFound(format!("{}@{}", image.repository, digest)))?;

        let data = self.pull_blob(image, &digest).await?;
        Ok(PulledManifest {
            media_type,
            data,
            digest,
        })
    }
}
