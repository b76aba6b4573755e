//! Concurrent per-platform build fan-out
//!
//! One unit of work runs per platform. Result slots are reserved up front
//! in registration order and every task carries its slot index, so results
//! never depend on completion order.
//!
//! Failure policy: run to completion. A failed unit does not cancel its
//! siblings; all failures are reported together, in registration order.
//! Dropping the `build_all` future drops the `JoinSet`, which aborts every
//! unit still in flight.

use crate::container::Container;
use crate::error::{PlatformFailure, XplatError, XplatResult};
use crate::platform::Platform;
use futures_util::FutureExt;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Results of every unit, in registration order
#[derive(Debug)]
pub struct BuildOutcome {
    results: Vec<(Platform, XplatResult<Container>)>,
}

impl BuildOutcome {
    /// Per-platform results, in registration order
    pub fn results(&self) -> &[(Platform, XplatResult<Container>)] {
        &self.results
    }

    /// True when every unit succeeded
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|(_, r)| r.is_ok())
    }

    /// Successful containers, in registration order
    pub fn successes(&self) -> Vec<&Container> {
        self.results.iter().filter_map(|(_, r)| r.as_ref().ok()).collect()
    }

    /// Number of failed units
    pub fn failure_count(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_err()).count()
    }

    /// All containers, or an `Aggregate` error listing every failure
    pub fn into_result(self) -> XplatResult<BuildSet> {
        let total = self.results.len();
        let mut containers = Vec::with_capacity(total);
        let mut failures = Vec::new();

        for (platform, result) in self.results {
            match result {
                Ok(container) => containers.push(container),
                Err(error) => failures.push(PlatformFailure {
                    platform,
                    error: Box::new(error),
                }),
            }
        }

        if failures.is_empty() {
            Ok(BuildSet { containers })
        } else {
            Err(XplatError::Aggregate { total, failures })
        }
    }
}

/// Successfully built containers, in registration order
#[derive(Debug, Clone)]
pub struct BuildSet {
    containers: Vec<Container>,
}

impl BuildSet {
    pub fn containers(&self) -> &[Container] {
        &self.containers
    }

    pub fn into_containers(self) -> Vec<Container> {
        self.containers
    }

    /// Container built for `platform`
    pub fn get(&self, platform: &Platform) -> Option<&Container> {
        self.containers.iter().find(|c| c.platform() == platform)
    }

    pub fn platforms(&self) -> Vec<Platform> {
        self.containers.iter().map(|c| c.platform().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

/// Fans a recipe out over a set of platforms
#[derive(Debug, Clone, Default)]
pub struct BuildCoordinator {
    parallelism: usize,
}

/// Reject empty and duplicate platform sets before any work is scheduled
pub fn validate_platforms(platforms: &[Platform]) -> XplatResult<()> {
    if platforms.is_empty() {
        return Err(XplatError::User("at least one platform is required".to_string()));
    }
    let mut seen = HashSet::new();
    for platform in platforms {
        if !seen.insert(platform) {
            return Err(XplatError::DuplicatePlatform(platform.clone()));
        }
    }
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

impl BuildCoordinator {
    /// Create a coordinator running at most `parallelism` units at once (0 = unbounded)
    pub fn new(parallelism: usize) -> Self {
        Self { parallelism }
    }

    /// Run `recipe` once per platform and fail with `Aggregate` if any unit failed
    pub async fn build_all<F, Fut>(&self, platforms: &[Platform], recipe: F) -> XplatResult<BuildSet>
    where
        F: Fn(Platform) -> Fut,
        Fut: Future<Output = XplatResult<Container>> + Send + 'static,
    {
        let outcome = self.build_all_settled(platforms, recipe).await?;
        if !outcome.is_success() {
            warn!(
                "{} of {} platform units failed",
                outcome.failure_count(),
                platforms.len()
            );
        }
        outcome.into_result()
    }

    /// Run `recipe` once per platform and return every unit's result.
    ///
    /// Only validation errors (empty or duplicate platform sets) are
    /// returned as `Err`; unit failures are inside the outcome.
    pub async fn build_all_settled<F, Fut>(
        &self,
        platforms: &[Platform],
        recipe: F,
    ) -> XplatResult<BuildOutcome>
    where
        F: Fn(Platform) -> Fut,
        Fut: Future<Output = XplatResult<Container>> + Send + 'static,
    {
        validate_platforms(platforms)?;

        let semaphore = (self.parallelism > 0).then(|| Arc::new(Semaphore::new(self.parallelism)));
        let mut slots: Vec<Option<XplatResult<Container>>> = platforms.iter().map(|_| None).collect();
        let mut join_set = JoinSet::new();

        info!(
            "Building {} platforms (parallelism: {})",
            platforms.len(),
            if self.parallelism == 0 {
                "unbounded".to_string()
            } else {
                self.parallelism.to_string()
            }
        );

        for (index, platform) in platforms.iter().enumerate() {
            let unit = recipe(platform.clone());
            let semaphore = semaphore.clone();
            let platform = platform.clone();

            join_set.spawn(async move {
                let _permit = match semaphore {
                    Some(s) => match s.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(e) => return (index, Err(XplatError::Internal(e.to_string()))),
                    },
                    None => None,
                };

                debug!("Unit {} ({}) started", index, platform);
                let result = match AssertUnwindSafe(unit).catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => Err(XplatError::Internal(format!(
                        "build for {} panicked: {}",
                        platform,
                        panic_message(payload.as_ref())
                    ))),
                };

                let result = result.and_then(|container| {
                    if container.platform() == &platform {
                        Ok(container)
                    } else {
                        Err(XplatError::PlatformMismatch {
                            expected: platform.clone(),
                            actual: container.platform().clone(),
                        })
                    }
                });

                debug!("Unit {} ({}) finished: ok={}", index, platform, result.is_ok());
                (index, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!("Build task failed to join: {}", e),
            }
        }

        let results = platforms
            .iter()
            .cloned()
            .zip(slots)
            .map(|(platform, slot)| {
                let result = slot.unwrap_or_else(|| {
                    Err(XplatError::Internal(format!("build for {} did not complete", platform)))
                });
                (platform, result)
            })
            .collect();

        Ok(BuildOutcome { results })
    }
}
