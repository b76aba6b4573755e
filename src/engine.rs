//! Build engine: lazy evaluation of container chains
//!
//! Containers are definitions; nothing runs until [`Engine::sync`] (or an
//! accessor that needs output) walks the chain parent first and executes
//! each pending command once per definition digest.
//!
//! A command runs against scratch copies:
//!
//! ```text
//! <store>/tmp/exec-<uuid>/
//! ├── rootfs/      (working copy of the container root)
//! └── mounts/<n>/  (working copy of each directory mount)
//! ```
//!
//! Cache volumes are bound live. After the command the rootfs and each
//! directory mount are snapshotted back into the store.

use crate::cache::{validate_mount_path, CacheVolume, CacheVolumes};
use crate::config::Config;
use crate::container::{Base, Container, Mount, MountSource};
use crate::coordinator::{BuildCoordinator, BuildSet};
use crate::error::{PlatformFailure, XplatError, XplatResult};
use crate::exec::{create_executor, BindMount, ExecReport, ExecRequest, Executor};
use crate::platform::Platform;
use crate::publish::{PublishedRef, Publisher};
use crate::registry::{create_registry, Registry};
use crate::store::{run_blocking, tree, ContentRef, ContentStore};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Entry point for building, running and publishing containers
pub struct Engine {
    config: Config,
    store: ContentStore,
    volumes: CacheVolumes,
    executor: Executor,
    registry: Arc<dyn Registry>,
    /// definition digest -> evaluated container
    memo: Mutex<HashMap<String, Container>>,
}

impl Engine {
    /// Create an engine from configuration, opening state under the state dir
    pub fn new(config: Config) -> XplatResult<Self> {
        let state = config.state_dir();
        let store = ContentStore::open(state.join("store"))?;
        let volumes = CacheVolumes::open(state.join("volumes"))?;
        let executor = create_executor(&config)?;
        let registry = create_registry(&config)?;
        Ok(Self::with_parts(config, store, volumes, executor, registry))
    }

    /// Create an engine from explicit parts
    pub fn with_parts(
        config: Config,
        store: ContentStore,
        volumes: CacheVolumes,
        executor: Executor,
        registry: Arc<dyn Registry>,
    ) -> Self {
        Self {
            config,
            store,
            volumes,
            executor,
            registry,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn volumes(&self) -> &CacheVolumes {
        &self.volumes
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn publisher(&self) -> Publisher {
        Publisher::new(self.store.clone(), self.registry.clone())
    }

    /// A container for `platform` with an empty root filesystem
    pub async fn container(&self, platform: Platform) -> XplatResult<Container> {
        let store = self.store.clone();
        let rootfs = run_blocking(move || store.empty()).await?;
        Ok(Container::new(platform, rootfs))
    }

    /// Pull the `platform` variant of a published image
    pub async fn from_image(&self, reference: &str, platform: &Platform) -> XplatResult<Container> {
        self.publisher().resolve(reference, platform).await
    }

    /// Snapshot a host directory into the store
    pub async fn directory_from_host(&self, path: &Path) -> XplatResult<ContentRef> {
        let store = self.store.clone();
        let path = path.to_path_buf();
        run_blocking(move || store.snapshot(&path)).await
    }

    /// A cache volume by name, created on first reference
    pub fn cache_volume(&self, name: &str) -> XplatResult<CacheVolume> {
        self.volumes.volume(name)
    }

    /// Evaluate every pending command in the chain and return the result
    pub async fn sync(&self, container: &Container) -> XplatResult<Container> {
        if container.is_resolved() {
            return Ok(container.clone());
        }

        let mut chain = vec![container.clone()];
        while let Base::Parent(parent) = chain[chain.len() - 1].base() {
            let parent = parent.clone();
            chain.push(parent);
        }
        chain.reverse();

        let mut previous: Option<(Container, Container)> = None;
        for node in chain {
            let resolved = self.evaluate(&node, previous.as_ref()).await?;
            previous = Some((node, resolved));
        }

        previous
            .map(|(_, resolved)| resolved)
            .ok_or_else(|| XplatError::Internal("empty container chain".to_string()))
    }

    /// Evaluate one node given its evaluated parent as `(definition, result)`
    async fn evaluate(
        &self,
        node: &Container,
        parent: Option<&(Container, Container)>,
    ) -> XplatResult<Container> {
        let rootfs = match (node.base(), parent) {
            (Base::Rootfs(r), _) => r.clone(),
            (Base::Parent(_), Some((_, resolved))) => resolved
                .rootfs()
                .cloned()
                .ok_or_else(|| XplatError::Internal("parent evaluated without rootfs".to_string()))?,
            (Base::Parent(_), None) => {
                return Err(XplatError::Internal("parent was not evaluated".to_string()))
            }
        };

        // Mounts inherited unchanged from the parent see its command's writes
        let mounts: Vec<Mount> = node
            .mounts()
            .iter()
            .map(|m| match parent {
                Some((definition, resolved)) if definition.mounts().contains(m) => resolved
                    .mounts()
                    .iter()
                    .find(|r| r.path == m.path)
                    .cloned()
                    .unwrap_or_else(|| m.clone()),
                _ => m.clone(),
            })
            .collect();

        if node.pending_exec().is_none() {
            let last_exec = node
                .last_exec_shared()
                .or_else(|| parent.and_then(|(_, r)| r.last_exec_shared()));
            return Ok(Container::resolved(
                node.platform().clone(),
                rootfs,
                node.env().clone(),
                node.workdir().map(str::to_string),
                mounts,
                last_exec,
            ));
        }

        if let Some(hit) = self.memo.lock().await.get(node.digest()) {
            debug!("Reusing evaluation of {}", &node.digest()[..12]);
            return Ok(hit.clone());
        }

        let result = self.execute(node, rootfs, mounts).await?;
        self.memo
            .lock()
            .await
            .insert(node.digest().to_string(), result.clone());
        Ok(result)
    }

    /// Run the node's pending command against scratch copies
    async fn execute(&self, node: &Container, rootfs: ContentRef, mounts: Vec<Mount>) -> XplatResult<Container> {
        let scratch = self.store.scratch_path("exec");
        let result = self.execute_in(&scratch, node, rootfs, mounts).await;

        let cleanup = scratch.clone();
        if let Err(e) = run_blocking(move || tree::remove_tree(&cleanup)).await {
            debug!("Failed to clean up {}: {}", scratch.display(), e);
        }
        result
    }

    async fn execute_in(
        &self,
        scratch: &Path,
        node: &Container,
        rootfs: ContentRef,
        mounts: Vec<Mount>,
    ) -> XplatResult<Container> {
        let command = node
            .pending_exec()
            .cloned()
            .ok_or_else(|| XplatError::Internal("no pending command".to_string()))?;
        let root_dir = scratch.join("rootfs");

        // Working copies: rootfs plus one directory per directory mount
        let mut binds = Vec::with_capacity(mounts.len());
        let mut copies: Vec<(PathBuf, ContentRef)> = vec![(root_dir.clone(), rootfs)];
        for (i, mount) in mounts.iter().enumerate() {
            let host = match mount.source {
                MountSource::Directory(ref content) => {
                    let dir = scratch.join("mounts").join(i.to_string());
                    copies.push((dir.clone(), content.clone()));
                    dir
                }
                MountSource::Cache(ref volume) => volume.path.clone(),
            };
            binds.push(BindMount {
                host,
                target: mount.path.clone(),
            });
        }

        let store = self.store.clone();
        run_blocking(move || {
            copies
                .iter()
                .try_for_each(|(dest, content)| store.materialize(content, dest))
        })
        .await?;

        let request = ExecRequest {
            platform: node.platform().clone(),
            rootfs: root_dir.clone(),
            args: command.args.clone(),
            env: node.env().clone(),
            workdir: node.workdir().map(str::to_string),
            mounts: binds,
        };

        info!("Running `{}` for {}", command, node.platform());
        let report = self.executor.run(&request).await?;

        let store = self.store.clone();
        let scratch_dir = scratch.to_path_buf();
        let (rootfs, mounts) = run_blocking(move || {
            let rootfs = store.snapshot(&root_dir)?;
            let mut snapshotted = Vec::with_capacity(mounts.len());
            for (i, mount) in mounts.into_iter().enumerate() {
                let source = match mount.source {
                    MountSource::Directory(_) => {
                        let dir = scratch_dir.join("mounts").join(i.to_string());
                        MountSource::Directory(store.snapshot(&dir)?)
                    }
                    cache @ MountSource::Cache(_) => cache,
                };
                snapshotted.push(Mount {
                    path: mount.path,
                    source,
                });
            }
            Ok((rootfs, snapshotted))
        })
        .await?;

        Ok(Container::resolved(
            node.platform().clone(),
            rootfs,
            node.env().clone(),
            node.workdir().map(str::to_string),
            mounts,
            Some(Arc::new(report)),
        ))
    }

    /// Report of the container's most recent command
    pub async fn exec_report(&self, container: &Container) -> XplatResult<ExecReport> {
        let synced = self.sync(container).await?;
        synced.last_exec().cloned().ok_or_else(|| {
            XplatError::User(format!(
                "no command has been executed in the {} container",
                container.platform()
            ))
        })
    }

    /// Standard output of the container's most recent command
    pub async fn stdout(&self, container: &Container) -> XplatResult<String> {
        Ok(self.exec_report(container).await?.stdout)
    }

    /// Standard error of the container's most recent command
    pub async fn stderr(&self, container: &Container) -> XplatResult<String> {
        Ok(self.exec_report(container).await?.stderr)
    }

    /// Root filesystem after evaluation
    pub async fn rootfs(&self, container: &Container) -> XplatResult<ContentRef> {
        let synced = self.sync(container).await?;
        synced
            .rootfs()
            .cloned()
            .ok_or_else(|| XplatError::Internal("evaluated container has no rootfs".to_string()))
    }

    /// Content of the directory at `path` after evaluation.
    ///
    /// Paths inside a mount read the mount's content rather than the rootfs.
    pub async fn directory(&self, container: &Container, path: &str) -> XplatResult<ContentRef> {
        let synced = self.sync(container).await?;
        let rootfs = synced
            .rootfs()
            .cloned()
            .ok_or_else(|| XplatError::Internal("evaluated container has no rootfs".to_string()))?;
        let path = if path.trim_end_matches('/').is_empty() {
            "/".to_string()
        } else {
            validate_mount_path(path)?
        };

        // Mounts are sorted by path, so the innermost match comes last
        let inner = synced
            .mounts()
            .iter()
            .rev()
            .find_map(|m| m.strip(&path).map(|rest| (m.source.clone(), rest.to_string())));

        let store = self.store.clone();
        run_blocking(move || match inner {
            Some((MountSource::Directory(content), rest)) => store.subtree(&content, &rest),
            Some((MountSource::Cache(volume), rest)) => {
                store.snapshot(&tree::resolve_within(&volume.path, &rest)?)
            }
            None => store.subtree(&rootfs, &path),
        })
        .await
    }

    /// Sorted entry names of a directory inside a tree
    pub async fn entries(&self, content: &ContentRef, path: &str) -> XplatResult<Vec<String>> {
        let store = self.store.clone();
        let (content, path) = (content.clone(), path.to_string());
        run_blocking(move || store.entries(&content, &path)).await
    }

    /// Contents of a file inside a tree
    pub async fn read_file(&self, content: &ContentRef, path: &str) -> XplatResult<Vec<u8>> {
        let store = self.store.clone();
        let (content, path) = (content.clone(), path.to_string());
        run_blocking(move || store.read_file(&content, &path)).await
    }

    /// Run `recipe` for each platform concurrently
    pub async fn build_all<F, Fut>(&self, platforms: &[Platform], recipe: F) -> XplatResult<BuildSet>
    where
        F: Fn(Platform) -> Fut,
        Fut: Future<Output = XplatResult<Container>> + Send + 'static,
    {
        BuildCoordinator::new(self.config.build.parallelism)
            .build_all(platforms, recipe)
            .await
    }

    /// Evaluate the containers and publish them as one multi-platform image
    pub async fn publish(&self, reference: &str, containers: &[Container]) -> XplatResult<PublishedRef> {
        let results = join_all(containers.iter().map(|c| self.sync(c))).await;

        let total = results.len();
        let mut synced = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for (container, result) in containers.iter().zip(results) {
            match result {
                Ok(c) => synced.push(c),
                Err(error) => failures.push(PlatformFailure {
                    platform: container.platform().clone(),
                    error: Box::new(error),
                }),
            }
        }
        if !failures.is_empty() {
            return Err(XplatError::Aggregate { total, failures });
        }

        self.publisher().publish(reference, &synced).await
    }

    /// Pull a variant; alias of [`Engine::from_image`]
    pub async fn resolve(&self, reference: &str, platform: &Platform) -> XplatResult<Container> {
        self.from_image(reference, platform).await
    }
}
