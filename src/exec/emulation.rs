//! Cross-architecture emulation capability
//!
//! Emulation is user-mode binary translation (qemu-user) registered with
//! the kernel through binfmt_misc. Once a handler for an architecture is
//! registered, foreign binaries run transparently and see the emulated
//! architecture from `uname -m`.

use crate::config::schema::EmulationConfig;
use crate::error::{XplatError, XplatResult};
use crate::platform::Arch;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Injected emulation capability
#[async_trait]
pub trait Emulator: Send + Sync {
    /// Get the human-readable emulator name for display
    fn name(&self) -> &'static str;

    /// Whether binaries for `arch` can run right now
    async fn is_registered(&self, arch: Arch) -> bool;

    /// Make sure `arch` can run, installing a handler if allowed.
    ///
    /// Returns the handler name used for execution reports.
    async fn ensure(&self, arch: Arch) -> XplatResult<String>;
}

/// Emulation through binfmt_misc registered qemu-user handlers
pub struct BinfmtEmulator {
    binfmt_dir: PathBuf,
    auto_install: bool,
    installer_image: String,
    podman: String,
    install_lock: Mutex<()>,
}

impl BinfmtEmulator {
    /// Create from emulation settings
    pub fn new(config: &EmulationConfig, podman: impl Into<String>) -> Self {
        Self {
            binfmt_dir: config.binfmt_dir.clone(),
            auto_install: config.auto_install,
            installer_image: config.installer_image.clone(),
            podman: podman.into(),
            install_lock: Mutex::new(()),
        }
    }

    /// binfmt_misc handler name for an architecture
    pub fn handler_name(arch: Arch) -> String {
        format!("qemu-{}", arch.qemu_name())
    }

    fn handler_path(&self, arch: Arch) -> PathBuf {
        self.binfmt_dir.join(Self::handler_name(arch))
    }

    /// Register handlers by running the installer image privileged
    async fn install(&self, arch: Arch) -> XplatResult<()> {
        let args = [
            "run",
            "--rm",
            "--privileged",
            self.installer_image.as_str(),
            "--install",
            arch.as_str(),
        ];
        info!("Registering emulator for {} via {}", arch, self.installer_image);
        debug!("Executing: {} {:?}", self.podman, args);

        let output = Command::new(&self.podman)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| XplatError::command_failed(format!("{} {:?}", self.podman, args), e))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(XplatError::EmulationUnavailable {
                arch: arch.to_string(),
                reason: format!(
                    "installer failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            })
        }
    }
}

#[async_trait]
impl Emulator for BinfmtEmulator {
    fn name(&self) -> &'static str {
        "binfmt"
    }

    async fn is_registered(&self, arch: Arch) -> bool {
        match tokio::fs::read_to_string(self.handler_path(arch)).await {
            Ok(content) => content.lines().next().map(str::trim) == Some("enabled"),
            Err(_) => false,
        }
    }

    async fn ensure(&self, arch: Arch) -> XplatResult<String> {
        let handler = Self::handler_name(arch);
        if self.is_registered(arch).await {
            return Ok(handler);
        }

        if !self.auto_install {
            return Err(XplatError::EmulationUnavailable {
                arch: arch.to_string(),
                reason: format!(
                    "no {} handler registered in {}",
                    handler,
                    self.binfmt_dir.display()
                ),
            });
        }

        // One install at a time; a concurrent caller may already have done it
        let _guard = self.install_lock.lock().await;
        if self.is_registered(arch).await {
            return Ok(handler);
        }

        self.install(arch).await?;

        if self.is_registered(arch).await {
            Ok(handler)
        } else {
            warn!("Installer finished but {} is still not registered", handler);
            Err(XplatError::EmulationUnavailable {
                arch: arch.to_string(),
                reason: format!("{} not registered after install", handler),
            })
        }
    }
}

/// Emulation disabled: every foreign architecture is unavailable
pub struct NoEmulation;

#[async_trait]
impl Emulator for NoEmulation {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn is_registered(&self, _arch: Arch) -> bool {
        false
    }

    async fn ensure(&self, arch: Arch) -> XplatResult<String> {
        Err(XplatError::EmulationUnavailable {
            arch: arch.to_string(),
            reason: "emulation is disabled (emulation.enabled = false)".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn emulator(dir: &TempDir, auto_install: bool) -> BinfmtEmulator {
        let config = EmulationConfig {
            enabled: true,
            auto_install,
            installer_image: "example.invalid/binfmt".to_string(),
            binfmt_dir: dir.path().to_path_buf(),
        };
        BinfmtEmulator::new(&config, "/nonexistent/podman-xplat-test")
    }

    #[tokio::test]
    async fn registered_handler_is_used() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("qemu-s390x"),
            "enabled\ninterpreter /usr/bin/qemu-s390x-static\n",
        )
        .unwrap();

        let emu = emulator(&dir, false);
        assert!(emu.is_registered(Arch::S390x).await);
        assert_eq!(emu.ensure(Arch::S390x).await.unwrap(), "qemu-s390x");
    }

    #[tokio::test]
    async fn disabled_handler_is_not_registered() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("qemu-aarch64"), "disabled\n").unwrap();

        let emu = emulator(&dir, false);
        assert!(!emu.is_registered(Arch::Arm64).await);
    }

    #[tokio::test]
    async fn missing_handler_without_auto_install_fails() {
        let dir = TempDir::new().unwrap();
        let err = emulator(&dir, false).ensure(Arch::Riscv64).await.unwrap_err();
        assert!(matches!(err, XplatError::EmulationUnavailable { .. }));
        assert!(err.to_string().contains("qemu-riscv64"));
    }

    #[tokio::test]
    async fn failed_install_is_reported() {
        let dir = TempDir::new().unwrap();
        let err = emulator(&dir, true).ensure(Arch::Ppc64le).await.unwrap_err();
        assert!(matches!(err, XplatError::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn no_emulation_always_fails() {
        assert!(!NoEmulation.is_registered(Arch::Arm64).await);
        assert!(NoEmulation.ensure(Arch::Arm64).await.is_err());
    }
}
