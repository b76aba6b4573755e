//! Rootless Podman execution backend
//!
//! Runs commands against an exploded root filesystem with
//! `podman run --rootfs`. Foreign-architecture binaries inside the rootfs
//! are dispatched by the kernel to the registered binfmt_misc handler, so
//! the same invocation serves native and emulated requests.

use crate::error::{XplatError, XplatResult};
use crate::exec::backend::ExecBackend;
use crate::exec::{ExecMode, ExecOutput, ExecRequest};
use async_trait::async_trait;
use semver::Version;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Oldest Podman release with the `--rootfs` behavior we rely on
const MIN_PODMAN_VERSION: Version = Version::new(4, 0, 0);

/// Execution backend using native rootless Podman
pub struct PodmanBackend {
    program: String,
}

impl PodmanBackend {
    /// Create a backend invoking the given podman binary
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Execute a Podman command and return the output
    async fn podman(&self, args: &[String]) -> XplatResult<std::process::Output> {
        debug!("Executing: {} {:?}", self.program, args);

        Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| XplatError::command_failed(format!("{} {:?}", self.program, args), e))
    }

    /// Installed podman version, if podman runs at all
    pub async fn version(&self) -> Option<Version> {
        let output = self
            .podman(&["version".to_string(), "--format".to_string(), "{{.Client.Version}}".to_string()])
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        parse_version(&String::from_utf8_lossy(&output.stdout))
    }

    /// Fail with `BackendUnavailable` unless a supported podman is installed
    pub async fn ensure_ready(&self) -> XplatResult<()> {
        match self.version().await {
            Some(v) if v >= MIN_PODMAN_VERSION => Ok(()),
            Some(v) => Err(XplatError::BackendUnavailable {
                backend: self.name().to_string(),
                reason: format!("podman {} is older than {}", v, MIN_PODMAN_VERSION),
            }),
            None => Err(XplatError::BackendUnavailable {
                backend: self.name().to_string(),
                reason: format!("{} not found or not runnable", self.program),
            }),
        }
    }

    /// Build the `podman run` argument list for a request
    pub fn run_args(request: &ExecRequest) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--network".to_string(),
            "none".to_string(),
        ];

        if let Some(ref workdir) = request.workdir {
            args.push("-w".to_string());
            args.push(workdir.clone());
        }

        for mount in &request.mounts {
            args.push("-v".to_string());
            args.push(format!("{}:{}:rw", mount.host.display(), mount.target));
        }

        for (k, v) in &request.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", k, v));
        }

        args.push("--rootfs".to_string());
        args.push(request.rootfs.display().to_string());
        args.extend(request.args.iter().cloned());
        args
    }
}

/// Parse podman's version output, tolerating suffixes like `4.9.4-dev`
fn parse_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    Version::parse(trimmed).ok().or_else(|| {
        let core: String = trimmed
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        Version::parse(&core).ok()
    })
}

impl Default for PodmanBackend {
    fn default() -> Self {
        Self::new("podman")
    }
}

#[async_trait]
impl ExecBackend for PodmanBackend {
    fn name(&self) -> &'static str {
        "podman"
    }

    async fn is_available(&self) -> XplatResult<bool> {
        Ok(self
            .version()
            .await
            .is_some_and(|v| v >= MIN_PODMAN_VERSION))
    }

    async fn exec(&self, request: &ExecRequest, mode: &ExecMode) -> XplatResult<ExecOutput> {
        self.ensure_ready().await?;

        let args = Self::run_args(request);
        info!("Running {:?} for {} ({})", request.args, request.platform, mode);

        let output = self.podman(&args).await?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}
