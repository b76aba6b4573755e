//! Execution mode selection and dispatch

use crate::error::{XplatError, XplatResult};
use crate::exec::backend::ExecBackend;
use crate::exec::emulation::Emulator;
use crate::exec::{ExecMode, ExecReport, ExecRequest};
use crate::platform::Platform;
use std::sync::Arc;
use tracing::debug;

/// Runs requests natively or under emulation depending on the target
#[derive(Clone)]
pub struct Executor {
    backend: Arc<dyn ExecBackend>,
    emulator: Arc<dyn Emulator>,
    host: Platform,
}

impl Executor {
    /// Create an executor for `host`
    pub fn new(backend: Arc<dyn ExecBackend>, emulator: Arc<dyn Emulator>, host: Platform) -> Self {
        Self {
            backend,
            emulator,
            host,
        }
    }

    /// Platform treated as native
    pub fn host(&self) -> &Platform {
        &self.host
    }

    pub fn backend(&self) -> &dyn ExecBackend {
        self.backend.as_ref()
    }

    pub fn emulator(&self) -> &dyn Emulator {
        self.emulator.as_ref()
    }

    /// Decide the execution mode for a platform, registering emulation if needed
    pub async fn mode_for(&self, platform: &Platform) -> XplatResult<ExecMode> {
        if !platform.supports_execution_on(&self.host) {
            return Err(XplatError::UnsupportedExecution {
                platform: platform.clone(),
                host: self.host.clone(),
            });
        }

        if platform.matches(&self.host) {
            return Ok(ExecMode::Native);
        }

        let emulator = self.emulator.ensure(platform.arch()).await?;
        Ok(ExecMode::Emulated { emulator })
    }

    /// Run a request and fail with `ExecutionFailed` on a non-zero exit
    pub async fn run(&self, request: &ExecRequest) -> XplatResult<ExecReport> {
        let mode = self.mode_for(&request.platform).await?;
        debug!(
            "Executing {:?} for {} on {} ({})",
            request.args, request.platform, self.host, mode
        );

        let output = self.backend.exec(request, &mode).await?;

        if output.exit_code != 0 {
            return Err(XplatError::ExecutionFailed {
                platform: request.platform.clone(),
                command: request.args.join(" "),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        Ok(ExecReport {
            platform: request.platform.clone(),
            host: self.host.clone(),
            mode,
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::emulation::NoEmulation;
    use crate::exec::ExecOutput;
    use crate::platform::Arch;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Echoes the target's `uname -m`, or exits with the code given as `exit N`
    struct EchoBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExecBackend for EchoBackend {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn is_available(&self) -> XplatResult<bool> {
            Ok(true)
        }

        async fn exec(&self, request: &ExecRequest, _mode: &ExecMode) -> XplatResult<ExecOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match request.args.as_slice() {
                [cmd, code] if cmd == "exit" => Ok(ExecOutput {
                    stderr: "boom".to_string(),
                    exit_code: code.parse().unwrap_or(1),
                    ..Default::default()
                }),
                _ => Ok(ExecOutput {
                    stdout: format!("{}\n", request.platform.arch().uname_machine()),
                    ..Default::default()
                }),
            }
        }
    }

    struct AlwaysEmulate;

    #[async_trait]
    impl Emulator for AlwaysEmulate {
        fn name(&self) -> &'static str {
            "test"
        }

        async fn is_registered(&self, _arch: Arch) -> bool {
            true
        }

        async fn ensure(&self, arch: Arch) -> XplatResult<String> {
            Ok(format!("qemu-{}", arch.qemu_name()))
        }
    }

    fn executor(emulator: Arc<dyn Emulator>) -> (Executor, Arc<EchoBackend>) {
        let backend = Arc::new(EchoBackend {
            calls: AtomicUsize::new(0),
        });
        let host = Platform::parse("linux/amd64").unwrap();
        (Executor::new(backend.clone(), emulator, host), backend)
    }

    fn request(platform: &str, args: &[&str]) -> ExecRequest {
        ExecRequest {
            platform: Platform::parse(platform).unwrap(),
            rootfs: PathBuf::from("/unused"),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: BTreeMap::new(),
            workdir: None,
            mounts: Vec::new(),
        }
    }

    #[tokio::test]
    async fn native_execution() {
        let (exec, _) = executor(Arc::new(NoEmulation));
        let report = exec.run(&request("linux/amd64", &["uname", "-m"])).await.unwrap();
        assert_eq!(report.mode, ExecMode::Native);
        assert_eq!(report.stdout.trim(), "x86_64");
    }

    #[tokio::test]
    async fn emulated_execution_reports_target_and_host() {
        let (exec, _) = executor(Arc::new(AlwaysEmulate));
        let report = exec.run(&request("linux/s390x", &["uname", "-m"])).await.unwrap();

        assert_eq!(report.stdout.trim(), "s390x");
        assert_eq!(report.platform.to_string(), "linux/s390x");
        assert_eq!(report.host.to_string(), "linux/amd64");
        assert_eq!(
            report.mode,
            ExecMode::Emulated {
                emulator: "qemu-s390x".to_string()
            }
        );
    }

    #[tokio::test]
    async fn foreign_os_is_rejected_before_backend() {
        let (exec, backend) = executor(Arc::new(AlwaysEmulate));
        let err = exec.run(&request("windows/amd64", &["cmd"])).await.unwrap_err();
        assert!(matches!(err, XplatError::UnsupportedExecution { .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn emulation_unavailable_is_propagated() {
        let (exec, backend) = executor(Arc::new(NoEmulation));
        let err = exec.run(&request("linux/arm64", &["true"])).await.unwrap_err();
        assert!(matches!(err, XplatError::EmulationUnavailable { .. }));
        assert!(!err.ran_and_failed());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_zero_exit_fails() {
        let (exec, _) = executor(Arc::new(NoEmulation));
        let err = exec.run(&request("linux/amd64", &["exit", "3"])).await.unwrap_err();
        match err {
            XplatError::ExecutionFailed {
                ref platform,
                exit_code,
                ref stderr,
                ..
            } => {
                assert_eq!(platform.to_string(), "linux/amd64");
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(err.ran_and_failed());
    }
}
