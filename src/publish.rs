//! Multi-platform publishing and platform-exact resolution
//!
//! Each container becomes one single-layer image (uncompressed tar of its
//! rootfs, plus config and manifest). The manifests are listed in an OCI
//! image index, sorted by canonical platform, and the index is pushed
//! under the reference's tag. Resolving selects the variant whose platform
//! equals the request exactly; there is no cross-architecture fallback.

use crate::container::Container;
use crate::coordinator::validate_platforms;
use crate::error::{PlatformFailure, XplatError, XplatResult};
use crate::platform::Platform;
use crate::registry::manifest::{
    is_index, parse_json, sha256_digest, Descriptor, ImageConfig, ImageIndex, ImageManifest,
    PlatformSpec, RuntimeConfig, MEDIA_TYPE_CONFIG, MEDIA_TYPE_INDEX, MEDIA_TYPE_LAYER,
    MEDIA_TYPE_MANIFEST,
};
use crate::registry::{ImageRef, Registry};
use crate::store::{archive, run_blocking, tree, ContentRef, ContentStore};
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

const DOCKER_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar";

/// Result of a successful publish
#[derive(Debug, Clone, Serialize)]
pub struct PublishedRef {
    /// Reference the index was pushed under
    pub reference: String,
    /// Digest of the image index
    pub digest: String,
    /// Manifest digest per platform, in index order
    pub variants: Vec<(Platform, String)>,
}

/// Pushes and resolves multi-platform artifacts
#[derive(Clone)]
pub struct Publisher {
    store: ContentStore,
    registry: Arc<dyn Registry>,
}

impl Publisher {
    pub fn new(store: ContentStore, registry: Arc<dyn Registry>) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &dyn Registry {
        self.registry.as_ref()
    }

    /// Publish one variant per container under `reference`.
    ///
    /// All containers must be resolved and target distinct platforms. If
    /// any variant fails to push, no index is written.
    pub async fn publish(&self, reference: &str, containers: &[Container]) -> XplatResult<PublishedRef> {
        let image = ImageRef::parse(reference)?;
        let tag = image.tag.clone().ok_or_else(|| XplatError::InvalidReference {
            reference: reference.to_string(),
            reason: "publishing needs a tag".to_string(),
        })?;

        let platforms: Vec<Platform> = containers.iter().map(|c| c.platform().clone()).collect();
        validate_platforms(&platforms)?;
        if let Some(unresolved) = containers.iter().find(|c| !c.is_resolved()) {
            return Err(XplatError::UnresolvedContainer(format!(
                "publishing {} for {}",
                reference,
                unresolved.platform()
            )));
        }

        info!("Publishing {} variants to {}", containers.len(), image);

        let pushes = containers.iter().map(|c| self.push_variant(&image, c));
        let results = join_all(pushes).await;

        let total = results.len();
        let mut descriptors = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for (platform, result) in platforms.into_iter().zip(results) {
            match result {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(error) => failures.push(PlatformFailure {
                    platform,
                    error: Box::new(error),
                }),
            }
        }
        if !failures.is_empty() {
            return Err(XplatError::Aggregate { total, failures });
        }

        let index = ImageIndex::new(descriptors);
        let variants = index
            .manifests
            .iter()
            .filter_map(|d| {
                let platform = d.platform.as_ref()?.to_platform().ok()?;
                Some((platform, d.digest.clone()))
            })
            .collect();

        let digest = self
            .registry
            .push_manifest(&image, &tag, MEDIA_TYPE_INDEX, serde_json::to_vec(&index)?)
            .await?;

        info!("Published {} as {}", image, digest);
        Ok(PublishedRef {
            reference: image.to_string(),
            digest,
            variants,
        })
    }

    /// Push layer, config and manifest for one container
    async fn push_variant(&self, image: &ImageRef, container: &Container) -> XplatResult<Descriptor> {
        let platform = container.platform();
        let rootfs = container
            .rootfs()
            .cloned()
            .ok_or_else(|| XplatError::UnresolvedContainer(format!("publishing {}", platform)))?;

        let store = self.store.clone();
        let layer = run_blocking(move || store.export_tar(&rootfs)).await?;
        let layer_desc = Descriptor::for_bytes(MEDIA_TYPE_LAYER, &layer);

        let runtime = RuntimeConfig {
            env: container.env().iter().map(|(k, v)| format!("{}={}", k, v)).collect(),
            working_dir: container.workdir().map(str::to_string),
        };
        let config = ImageConfig::new(platform, layer_desc.digest.clone(), runtime);
        let config_bytes = serde_json::to_vec(&config)?;
        let config_desc = Descriptor::for_bytes(MEDIA_TYPE_CONFIG, &config_bytes);

        self.registry
            .push_blob(image, &layer_desc.digest, layer)
            .await?;
        self.registry
            .push_blob(image, &config_desc.digest, config_bytes)
            .await?;

        let manifest = ImageManifest::new(config_desc, vec![layer_desc]);
        let manifest_bytes = serde_json::to_vec(&manifest)?;
        let descriptor = Descriptor {
            platform: Some(PlatformSpec::from_platform(platform)),
            ..Descriptor::for_bytes(MEDIA_TYPE_MANIFEST, &manifest_bytes)
        };
        self.registry
            .push_manifest(image, &descriptor.digest, MEDIA_TYPE_MANIFEST, manifest_bytes)
            .await?;

        debug!("Pushed {} variant {}", platform, descriptor.digest);
        Ok(descriptor)
    }

    /// Pull the variant of `reference` built for exactly `platform`
    pub async fn resolve(&self, reference: &str, platform: &Platform) -> XplatResult<Container> {
        let image = ImageRef::parse(reference)?;
        let pulled = self.registry.pull_manifest(&image, image.reference()).await?;

        let manifest_bytes = if is_index(&pulled.media_type) {
            let index: ImageIndex = parse_json(reference, &pulled.data)?;
            let descriptor = index.find(platform).ok_or_else(|| XplatError::PlatformNotFound {
                reference: reference.to_string(),
                platform: platform.clone(),
                available: available(&index.platforms()),
            })?;
            let variant = self.registry.pull_manifest(&image, &descriptor.digest).await?;
            if variant.digest != descriptor.digest {
                return Err(XplatError::DigestMismatch {
                    expected: descriptor.digest.clone(),
                    actual: variant.digest,
                });
            }
            variant.data
        } else {
            pulled.data
        };

        let manifest: ImageManifest = parse_json(reference, &manifest_bytes)?;
        let config_bytes = self.registry.pull_blob(&image, &manifest.config.digest).await?;
        let config: ImageConfig = parse_json(reference, &config_bytes)?;

        let actual = config.platform()?;
        if &actual != platform {
            return Err(XplatError::PlatformNotFound {
                reference: reference.to_string(),
                platform: platform.clone(),
                available: actual.to_string(),
            });
        }

        let mut layers = Vec::with_capacity(manifest.layers.len());
        for (i, layer) in manifest.layers.iter().enumerate() {
            if layer.media_type != MEDIA_TYPE_LAYER && layer.media_type != DOCKER_LAYER {
                return Err(XplatError::ManifestInvalid {
                    reference: reference.to_string(),
                    reason: format!("unsupported layer media type {}", layer.media_type),
                });
            }
            let bytes = self.registry.pull_blob(&image, &layer.digest).await?;
            if let Some(diff_id) = config.rootfs.diff_ids.get(i) {
                let actual = sha256_digest(&bytes);
                if &actual != diff_id {
                    return Err(XplatError::DigestMismatch {
                        expected: diff_id.clone(),
                        actual,
                    });
                }
            }
            layers.push(bytes);
        }

        let store = self.store.clone();
        let rootfs = run_blocking(move || unpack_layers(&store, &layers)).await?;

        info!("Resolved {} for {} to {}", image, platform, rootfs.short());
        Ok(Container::resolved(
            platform.clone(),
            rootfs,
            config.env_map(),
            config.config.working_dir.clone(),
            Vec::new(),
            None,
        ))
    }
}

/// Apply layers in order into a fresh tree and store it
fn unpack_layers(store: &ContentStore, layers: &[Vec<u8>]) -> XplatResult<ContentRef> {
    if let [single] = layers {
        return store.import_tar(single);
    }

    let temp = store.scratch_path("layers");
    let result = std::fs::create_dir_all(&temp)
        .map_err(|e| XplatError::io(format!("creating {}", temp.display()), e))
        .and_then(|()| {
            layers
                .iter()
                .try_for_each(|layer| archive::unpack(layer, &temp))
        })
        .and_then(|()| store.snapshot(&temp));
    tree::remove_tree(&temp)?;
    result
}

fn available(platforms: &[Platform]) -> String {
    if platforms.is_empty() {
        "none".to_string()
    } else {
        platforms
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}
