//! OCI image index, manifest and config documents
//!
//! Only the fields xplat reads or writes are modeled; unknown fields are
//! ignored on input.

use crate::error::{XplatError, XplatResult};
use crate::platform::Platform;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const MEDIA_TYPE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const MEDIA_TYPE_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";
pub const MEDIA_TYPE_DOCKER_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Media types accepted when pulling a manifest
pub const MANIFEST_ACCEPT: &[&str] = &[
    MEDIA_TYPE_INDEX,
    MEDIA_TYPE_MANIFEST,
    MEDIA_TYPE_DOCKER_LIST,
    MEDIA_TYPE_DOCKER_MANIFEST,
];

/// `sha256:<hex>` digest of a byte string
pub fn sha256_digest(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

/// Check that `bytes` hash to `expected`
pub fn verify_digest(expected: &str, bytes: &[u8]) -> XplatResult<()> {
    let actual = sha256_digest(bytes);
    if actual == expected {
        Ok(())
    } else {
        Err(XplatError::DigestMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Whether a media type names a multi-platform index
pub fn is_index(media_type: &str) -> bool {
    media_type == MEDIA_TYPE_INDEX || media_type == MEDIA_TYPE_DOCKER_LIST
}

/// Content descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Descriptor {
    /// Describe `bytes` with the given media type
    pub fn for_bytes(media_type: &str, bytes: &[u8]) -> Self {
        Self {
            media_type: media_type.to_string(),
            digest: sha256_digest(bytes),
            size: bytes.len() as u64,
            platform: None,
            annotations: BTreeMap::new(),
        }
    }
}

/// Platform object of an index descriptor or image config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSpec {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl PlatformSpec {
    pub fn from_platform(platform: &Platform) -> Self {
        Self {
            architecture: platform.arch().to_string(),
            os: platform.os().to_string(),
            variant: platform.variant().map(str::to_string),
        }
    }

    /// Parse into a normalized platform
    pub fn to_platform(&self) -> XplatResult<Platform> {
        let text = match self.variant {
            Some(ref v) if !v.is_empty() => format!("{}/{}/{}", self.os, self.architecture, v),
            _ => format!("{}/{}", self.os, self.architecture),
        };
        Platform::parse(&text)
    }
}

/// Multi-platform image index
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: String,
    pub manifests: Vec<Descriptor>,
}

impl ImageIndex {
    /// Build an index whose descriptors are sorted by canonical platform
    pub fn new(mut manifests: Vec<Descriptor>) -> Self {
        manifests.sort_by_key(|d| {
            d.platform
                .as_ref()
                .and_then(|p| p.to_platform().ok())
                .map(|p| p.to_string())
                .unwrap_or_default()
        });
        Self {
            schema_version: 2,
            media_type: MEDIA_TYPE_INDEX.to_string(),
            manifests,
        }
    }

    /// Platforms listed in the index, in index order; unparsable entries skipped
    pub fn platforms(&self) -> Vec<Platform> {
        self.manifests
            .iter()
            .filter_map(|d| d.platform.as_ref())
            .filter_map(|p| p.to_platform().ok())
            .collect()
    }

    /// Descriptor whose platform equals `platform` exactly
    pub fn find(&self, platform: &Platform) -> Option<&Descriptor> {
        self.manifests.iter().find(|d| {
            d.platform
                .as_ref()
                .and_then(|p| p.to_platform().ok())
                .is_some_and(|p| &p == platform)
        })
    }
}

/// Single-platform image manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

impl ImageManifest {
    pub fn new(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: MEDIA_TYPE_MANIFEST.to_string(),
            config,
            layers,
        }
    }
}

/// Execution defaults recorded in an image config
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(rename = "Env", default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(rename = "WorkingDir", default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

/// Layer chain of an image config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub fs_type: String,
    pub diff_ids: Vec<String>,
}

/// Image configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default)]
    pub config: RuntimeConfig,
    pub rootfs: RootFs,
}

impl ImageConfig {
    /// Config for a single-layer image
    pub fn new(platform: &Platform, diff_id: String, config: RuntimeConfig) -> Self {
        let spec = PlatformSpec::from_platform(platform);
        Self {
            architecture: spec.architecture,
            os: spec.os,
            variant: spec.variant,
            config,
            rootfs: RootFs {
                fs_type: "layers".to_string(),
                diff_ids: vec![diff_id],
            },
        }
    }

    pub fn platform(&self) -> XplatResult<Platform> {
        PlatformSpec {
            architecture: self.architecture.clone(),
            os: self.os.clone(),
            variant: self.variant.clone(),
        }
        .to_platform()
    }

    /// `KEY=VALUE` entries as a map; entries without `=` are dropped
    pub fn env_map(&self) -> BTreeMap<String, String> {
        self.config
            .env
            .iter()
            .filter_map(|e| e.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

/// Parse JSON manifest bytes with a descriptive error
pub fn parse_json<T: serde::de::DeserializeOwned>(reference: &str, bytes: &[u8]) -> XplatResult<T> {
    serde_json::from_slice(bytes).map_err(|e| XplatError::ManifestInvalid {
        reference: reference.to_string(),
        reason: e.to_string(),
    })
}
