//! Executor factory
//!
//! Builds the executor for this host from configuration.

use crate::config::Config;
use crate::error::{XplatError, XplatResult};
use crate::exec::backend::ExecBackend;
use crate::exec::emulation::{BinfmtEmulator, Emulator, NoEmulation};
use crate::exec::executor::Executor;
use crate::exec::podman::PodmanBackend;
use std::sync::Arc;

/// Create the executor described by `config`
///
/// # Returns
/// * `Ok(Executor)` - backend, emulator and host platform wired together
/// * `Err` - if the backend kind or default platform is invalid
pub fn create_executor(config: &Config) -> XplatResult<Executor> {
    let backend: Arc<dyn ExecBackend> = match config.backend.kind.as_str() {
        "podman" => Arc::new(PodmanBackend::new(config.backend.podman_path.clone())),
        other => {
            return Err(XplatError::User(format!(
                "Unknown backend kind: {} (supported: podman)",
                other
            )))
        }
    };

    let emulator: Arc<dyn Emulator> = if config.emulation.enabled {
        Arc::new(BinfmtEmulator::new(
            &config.emulation,
            config.backend.podman_path.clone(),
        ))
    } else {
        Arc::new(NoEmulation)
    };

    Ok(Executor::new(backend, emulator, config.default_platform()?))
}
