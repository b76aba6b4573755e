//! Image registry clients
//!
//! The [`Registry`] trait covers the blob and manifest operations of the
//! OCI distribution protocol. Two implementations exist:
//!
//! - [`LocalRegistry`]: content-addressed directory under the state dir
//!   (the default, needs no network)
//! - [`HttpRegistry`]: OCI distribution v2 over HTTP(S), unauthenticated

pub mod http;
pub mod local;
pub mod manifest;

pub use http::HttpRegistry;
pub use local::LocalRegistry;

use crate::config::Config;
use crate::error::{XplatError, XplatResult};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Image reference: `[registry/]repository[:tag][@digest]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    pub registry: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageRef {
    /// Parse a reference; a missing tag and digest means `latest`
    pub fn parse(text: &str) -> XplatResult<Self> {
        let invalid = |reason: &str| XplatError::InvalidReference {
            reference: text.to_string(),
            reason: reason.to_string(),
        };

        let text_trimmed = text.trim();
        if text_trimmed.is_empty() {
            return Err(invalid("reference is empty"));
        }

        let (name_tag, digest) = match text_trimmed.split_once('@') {
            Some((n, d)) => (n, Some(d.to_string())),
            None => (text_trimmed, None),
        };

        if let Some(ref d) = digest {
            let valid = d
                .strip_prefix("sha256:")
                .is_some_and(|h| h.len() == 64 && h.chars().all(|c| c.is_ascii_hexdigit()));
            if !valid {
                return Err(invalid("digest must be sha256:<64 hex>"));
            }
        }

        let (registry, rest) = match name_tag.split_once('/') {
            Some((first, rest)) if first.contains('.') || first.contains(':') || first == "localhost" => {
                (Some(first.to_string()), rest)
            }
            _ => (None, name_tag),
        };

        let (repository, tag) = match rest.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => (repo, Some(tag.to_string())),
            _ => (rest, None),
        };

        if repository.is_empty() {
            return Err(invalid("repository is empty"));
        }
        let repo_ok = repository
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-' | '/'));
        if !repo_ok || repository.starts_with('/') || repository.ends_with('/') || repository.contains("..") {
            return Err(invalid("repository must be lowercase [a-z0-9._-/]"));
        }

        if let Some(ref t) = tag {
            let tag_ok = !t.is_empty()
                && t.len() <= 128
                && t.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
            if !tag_ok {
                return Err(invalid("tag must be [A-Za-z0-9._-], at most 128 characters"));
            }
        }

        let tag = if tag.is_none() && digest.is_none() {
            Some("latest".to_string())
        } else {
            tag
        };

        Ok(Self {
            registry,
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    /// Manifest reference to pull: the digest when pinned, else the tag
    pub fn reference(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or("latest")
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref registry) = self.registry {
            write!(f, "{}/", registry)?;
        }
        f.write_str(&self.repository)?;
        if let Some(ref tag) = self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(ref digest) = self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// A manifest fetched from a registry
#[derive(Debug, Clone)]
pub struct PulledManifest {
    pub media_type: String,
    pub data: Vec<u8>,
    /// Digest of `data`
    pub digest: String,
}

/// Registry operations used for publishing and resolving images
#[async_trait]
pub trait Registry: Send + Sync {
    /// Get the human-readable registry name for display
    fn name(&self) -> &'static str;

    /// Check whether a blob is present in the image's repository
    async fn has_blob(&self, image: &ImageRef, digest: &str) -> XplatResult<bool>;

    /// Upload a blob; the content must hash to `digest`
    async fn push_blob(&self, image: &ImageRef, digest: &str, data: Vec<u8>) -> XplatResult<()>;

    /// Download a blob, verified against `digest`
    async fn pull_blob(&self, image: &ImageRef, digest: &str) -> XplatResult<Vec<u8>>;

    /// Store a manifest under `reference` (a tag or its digest) and return its digest
    async fn push_manifest(
        &self,
        image: &ImageRef,
        reference: &str,
        media_type: &str,
        data: Vec<u8>,
    ) -> XplatResult<String>;

    /// Fetch a manifest by tag or digest
    async fn pull_manifest(&self, image: &ImageRef, reference: &str) -> XplatResult<PulledManifest>;
}

/// Create the registry described by `config`
pub fn create_registry(config: &Config) -> XplatResult<Arc<dyn Registry>> {
    match config.registry.kind.as_str() {
        "local" => Ok(Arc::new(LocalRegistry::open(config.registry_dir())?)),
        "http" => Ok(Arc::new(HttpRegistry::new(
            config.registry.insecure,
            config.registry.timeout_secs,
        ))),
        other => Err(XplatError::User(format!(
            "Unknown registry kind: {} (supported: local, http)",
            other
        ))),
    }
}
