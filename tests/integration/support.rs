//! In-process stand-ins for podman and binfmt_misc
//!
//! `FakeBackend` interprets a handful of commands directly against the
//! materialized rootfs and bind mounts, reporting the *target* architecture
//! the way a binary running under qemu-user would.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use xplat::cache::CacheVolumes;
use xplat::config::Config;
use xplat::exec::{ExecBackend, ExecMode, ExecOutput, ExecRequest, Emulator, Executor, NoEmulation};
use xplat::platform::{Arch, Platform};
use xplat::registry::LocalRegistry;
use xplat::store::ContentStore;
use xplat::{Engine, XplatError, XplatResult};

/// Commands:
///
/// - `uname -m`
/// - `write PATH TEXT`
/// - `cat PATH`
/// - `ls PATH`
/// - `printenv KEY`
/// - `build-arch PATH DELAY_MS` (sleep, then write `uname -m` to PATH)
/// - `exit CODE`
#[derive(Default)]
pub struct FakeBackend {
    pub calls: AtomicUsize,
}

fn host_path(request: &ExecRequest, path: &str) -> PathBuf {
    let mount = request
        .mounts
        .iter()
        .filter(|m| path == m.target || path.starts_with(&format!("{}/", m.target)))
        .max_by_key(|m| m.target.len());
    match mount {
        Some(m) => m.host.join(path[m.target.len()..].trim_start_matches('/')),
        None => request.rootfs.join(path.trim_start_matches('/')),
    }
}

fn write(request: &ExecRequest, path: &str, text: &str) -> std::io::Result<()> {
    let target = host_path(request, path);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(target, text)
}

fn ok(stdout: String) -> ExecOutput {
    ExecOutput {
        stdout,
        ..Default::default()
    }
}

fn failed(code: i32, stderr: String) -> ExecOutput {
    ExecOutput {
        stderr,
        exit_code: code,
        ..Default::default()
    }
}

#[async_trait]
impl ExecBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn is_available(&self) -> XplatResult<bool> {
        Ok(true)
    }

    async fn exec(&self, request: &ExecRequest, _mode: &ExecMode) -> XplatResult<ExecOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let machine = request.platform.arch().uname_machine();
        let args: Vec<&str> = request.args.iter().map(String::as_str).collect();

        let output = match args.as_slice() {
            ["uname", "-m"] => ok(format!("{}\n", machine)),
            ["write", path, text] => match write(request, path, text) {
                Ok(()) => ok(String::new()),
                Err(e) => failed(1, e.to_string()),
            },
            ["cat", path] => match std::fs::read_to_string(host_path(request, path)) {
                Ok(text) => ok(text),
                Err(e) => failed(1, e.to_string()),
            },
            ["ls", path] => match std::fs::read_dir(host_path(request, path)) {
                Ok(read) => {
                    let mut names: Vec<String> = read
                        .filter_map(|e| e.ok())
                        .map(|e| e.file_name().to_string_lossy().into_owned())
                        .collect();
                    names.sort();
                    ok(names.iter().map(|n| format!("{}\n", n)).collect())
                }
                Err(e) => failed(2, e.to_string()),
            },
            ["printenv", key] => match request.env.get(*key) {
                Some(value) => ok(format!("{}\n", value)),
                None => failed(1, String::new()),
            },
            ["build-arch", path, delay] => {
                let delay = delay.parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                match write(request, path, machine) {
                    Ok(()) => ok(String::new()),
                    Err(e) => failed(1, e.to_string()),
                }
            }
            ["exit", code] => failed(code.parse().unwrap_or(1), format!("exited with {}", code)),
            _ => failed(127, format!("{}: command not found", request.args.join(" "))),
        };
        Ok(output)
    }
}

/// Emulator that registers every architecture and remembers which were asked for
#[derive(Default)]
pub struct RecordingEmulator {
    pub ensured: Mutex<Vec<Arch>>,
}

#[async_trait]
impl Emulator for RecordingEmulator {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn is_registered(&self, arch: Arch) -> bool {
        self.ensured.lock().map(|e| e.contains(&arch)).unwrap_or(false)
    }

    async fn ensure(&self, arch: Arch) -> XplatResult<String> {
        let mut ensured = self
            .ensured
            .lock()
            .map_err(|e| XplatError::Internal(e.to_string()))?;
        if !ensured.contains(&arch) {
            ensured.push(arch);
        }
        Ok(format!("qemu-{}", arch.qemu_name()))
    }
}

pub struct Harness {
    pub _temp: TempDir,
    pub engine: Arc<Engine>,
    pub backend: Arc<FakeBackend>,
    pub emulator: Arc<RecordingEmulator>,
}

impl Harness {
    pub fn calls(&self) -> usize {
        self.backend.calls.load(Ordering::SeqCst)
    }
}

pub fn platform(text: &str) -> Platform {
    Platform::parse(text).unwrap()
}

/// Engine on a `linux/amd64` host with the fake backend and a recording emulator
pub fn harness() -> Harness {
    let emulator = Arc::new(RecordingEmulator::default());
    build(emulator.clone(), emulator)
}

/// Same host, but foreign architectures cannot be emulated
pub fn harness_without_emulation() -> Harness {
    build(Arc::new(NoEmulation), Arc::new(RecordingEmulator::default()))
}

fn build(used: Arc<dyn Emulator>, emulator: Arc<RecordingEmulator>) -> Harness {
    let temp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.engine.state_dir = Some(temp.path().to_path_buf());
    config.engine.default_platform = Some("linux/amd64".to_string());

    let backend = Arc::new(FakeBackend::default());
    let executor = Executor::new(backend.clone(), used, platform("linux/amd64"));

    let engine = Engine::with_parts(
        config,
        ContentStore::open(temp.path().join("store")).unwrap(),
        CacheVolumes::open(temp.path().join("volumes")).unwrap(),
        executor,
        Arc::new(LocalRegistry::open(temp.path().join("registry")).unwrap()),
    );

    Harness {
        _temp: temp,
        engine: Arc::new(engine),
        backend,
        emulator,
    }
}
