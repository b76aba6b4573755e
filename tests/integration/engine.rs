//! Engine behavior end to end, with the container runtime faked out

use crate::support::{harness, harness_without_emulation, platform};
use std::path::Path;
use xplat::exec::ExecMode;
use xplat::platform::Arch;
use xplat::{Container, XplatError};

const REF: &str = "team/tool:v1";

fn build_delay(p: &xplat::Platform) -> &'static str {
    // First registered finishes last
    match p.arch().as_str() {
        "amd64" => "60",
        "arm64" => "40",
        "s390x" => "20",
        _ => "0",
    }
}

#[tokio::test]
async fn emulated_commands_observe_the_target_architecture() {
    let h = harness();

    let arm = h.engine.container(platform("linux/arm64")).await.unwrap();
    let report = h
        .engine
        .exec_report(&arm.with_exec(["uname", "-m"]))
        .await
        .unwrap();

    assert_eq!(report.stdout, "aarch64\n");
    assert_eq!(report.platform, platform("linux/arm64"));
    assert_eq!(report.host, platform("linux/amd64"));
    assert_eq!(
        report.mode,
        ExecMode::Emulated {
            emulator: "qemu-aarch64".to_string()
        }
    );

    let native = h.engine.container(platform("linux/amd64")).await.unwrap();
    let report = h
        .engine
        .exec_report(&native.with_exec(["uname", "-m"]))
        .await
        .unwrap();
    assert_eq!(report.stdout, "x86_64\n");
    assert_eq!(report.mode, ExecMode::Native);

    assert_eq!(*h.emulator.ensured.lock().unwrap(), vec![Arch::Arm64]);
}

#[tokio::test]
async fn emulation_unavailable_fails_before_running() {
    let h = harness_without_emulation();

    let arm = h.engine.container(platform("linux/arm64")).await.unwrap();
    let err = h
        .engine
        .sync(&arm.with_exec(["uname", "-m"]))
        .await
        .unwrap_err();

    assert!(matches!(err, XplatError::EmulationUnavailable { .. }));
    assert!(!err.ran_and_failed());
    assert_eq!(h.calls(), 0);
}

#[tokio::test]
async fn cross_compile_publish_and_resolve_each_variant() {
    let h = harness();
    let platforms = vec![
        platform("linux/amd64"),
        platform("linux/arm64"),
        platform("linux/s390x"),
        platform("linux/ppc64le"),
    ];

    let engine = h.engine.clone();
    let built = h
        .engine
        .build_all(&platforms, move |p| {
            let engine = engine.clone();
            async move {
                let delay = build_delay(&p);
                let container = engine
                    .container(p)
                    .await?
                    .with_exec(["build-arch", "/usr/bin/tool", delay]);
                engine.sync(&container).await
            }
        })
        .await
        .unwrap();

    assert_eq!(built.platforms(), platforms);

    let published = h.engine.publish(REF, built.containers()).await.unwrap();
    assert_eq!(published.variants.len(), 4);

    for p in &platforms {
        let pulled = h.engine.from_image(REF, p).await.unwrap();
        assert_eq!(pulled.platform(), p);

        let tool = h.engine.rootfs(&pulled).await.unwrap();
        let bytes = h.engine.read_file(&tool, "/usr/bin/tool").await.unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), p.arch().uname_machine());

        let report = h
            .engine
            .exec_report(&pulled.with_exec(["cat", "/usr/bin/tool"]))
            .await
            .unwrap();
        assert_eq!(report.stdout, p.arch().uname_machine());
        assert_eq!(&report.platform, p);
    }
}

#[tokio::test]
async fn cache_volume_is_shared_across_platforms() {
    let h = harness();
    let volume = h.engine.cache_volume("shared-build").unwrap();
    let platforms = vec![
        platform("linux/amd64"),
        platform("linux/arm64"),
        platform("linux/riscv64"),
    ];

    let engine = h.engine.clone();
    let writer = volume.clone();
    h.engine
        .build_all(&platforms, move |p| {
            let engine = engine.clone();
            let volume = writer.clone();
            async move {
                let marker = format!("/cache/{}", p.arch().as_str());
                let container = engine
                    .container(p)
                    .await?
                    .with_mounted_cache("/cache", &volume)?
                    .with_exec(vec!["write".to_string(), marker, "done".to_string()]);
                engine.sync(&container).await
            }
        })
        .await
        .unwrap();

    // Different platform, different mount path, same volume
    let reader = h
        .engine
        .container(platform("linux/s390x"))
        .await
        .unwrap()
        .with_mounted_cache("/data", &volume)
        .unwrap()
        .with_exec(["ls", "/data"]);
    assert_eq!(
        h.engine.stdout(&reader).await.unwrap(),
        "amd64\narm64\nriscv64\n"
    );

    let dir = h.engine.directory(&reader, "/data").await.unwrap();
    assert_eq!(
        h.engine.entries(&dir, "/").await.unwrap(),
        vec!["amd64", "arm64", "riscv64"]
    );
    assert!(volume.path.join("arm64").exists());
}

fn windows_root(dir: &Path) {
    std::fs::write(dir.join("License.txt"), "license").unwrap();
    for name in ["ProgramData", "Users", "Windows"] {
        std::fs::create_dir_all(dir.join(name)).unwrap();
        std::fs::write(dir.join(name).join(".keep"), "").unwrap();
    }
}

#[tokio::test]
async fn windows_variant_is_inspectable_but_not_executable() {
    let h = harness();
    let host_dir = tempfile::TempDir::new().unwrap();
    windows_root(host_dir.path());

    let rootfs = h.engine.directory_from_host(host_dir.path()).await.unwrap();
    let windows = Container::new(platform("windows/amd64"), rootfs);
    h.engine.publish("team/win:v1", &[windows]).await.unwrap();

    let pulled = h
        .engine
        .from_image("team/win:v1", &platform("windows/amd64"))
        .await
        .unwrap();
    let root = h.engine.rootfs(&pulled).await.unwrap();
    assert_eq!(
        h.engine.entries(&root, "/").await.unwrap(),
        vec!["License.txt", "ProgramData", "Users", "Windows"]
    );

    let err = h
        .engine
        .sync(&pulled.with_exec(["cmd", "/c", "ver"]))
        .await
        .unwrap_err();
    assert!(matches!(err, XplatError::UnsupportedExecution { .. }));
    assert!(err.hint().is_some());
    assert_eq!(h.calls(), 0);
}

#[tokio::test]
async fn publishing_twice_yields_the_same_digest() {
    let h = harness();
    let mut containers = Vec::new();
    for p in ["linux/amd64", "linux/arm/v7"] {
        let c = h
            .engine
            .container(platform(p))
            .await
            .unwrap()
            .with_exec(["build-arch", "/arch", "0"]);
        containers.push(h.engine.sync(&c).await.unwrap());
    }

    let first = h.engine.publish(REF, &containers).await.unwrap();
    let second = h.engine.publish(REF, &containers).await.unwrap();
    assert_eq!(first.digest, second.digest);

    for built in &containers {
        let pulled = h.engine.resolve(REF, built.platform()).await.unwrap();
        assert_eq!(
            h.engine.rootfs(&pulled).await.unwrap(),
            h.engine.rootfs(built).await.unwrap()
        );
    }

    let err = h
        .engine
        .resolve(REF, &platform("linux/arm64"))
        .await
        .unwrap_err();
    assert!(matches!(err, XplatError::PlatformNotFound { .. }));
}

#[tokio::test]
async fn one_failed_platform_does_not_cancel_the_rest() {
    let h = harness();
    let platforms = vec![
        platform("linux/amd64"),
        platform("linux/arm64"),
        platform("linux/s390x"),
    ];

    let engine = h.engine.clone();
    let err = h
        .engine
        .build_all(&platforms, move |p| {
            let engine = engine.clone();
            async move {
                let args = if p.arch() == Arch::Arm64 {
                    vec!["exit", "3"]
                } else {
                    vec!["build-arch", "/out", "30"]
                };
                let container = engine.container(p).await?.with_exec(args);
                engine.sync(&container).await
            }
        })
        .await
        .unwrap_err();

    assert!(err.to_string().starts_with("1 of 3 platform units failed"));
    let failures = err.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].platform, platform("linux/arm64"));
    assert!(failures[0].error.ran_and_failed());
    assert_eq!(h.calls(), 3);
}

#[tokio::test]
async fn duplicate_platforms_are_rejected() {
    let h = harness();
    let duplicate = vec![platform("linux/amd64"), platform("linux/x86_64")];

    let engine = h.engine.clone();
    let err = h
        .engine
        .build_all(&duplicate, move |p| {
            let engine = engine.clone();
            async move { engine.container(p).await }
        })
        .await
        .unwrap_err();
    assert!(matches!(err, XplatError::DuplicatePlatform(_)));

    let a = h.engine.container(platform("linux/amd64")).await.unwrap();
    let b = h.engine.container(platform("linux/x86_64")).await.unwrap();
    let err = h.engine.publish(REF, &[a, b]).await.unwrap_err();
    assert!(matches!(err, XplatError::DuplicatePlatform(_)));
}

#[tokio::test]
async fn directory_mount_writes_are_visible() {
    let h = harness();
    let empty = h.engine.store().empty().unwrap();

    let built = h
        .engine
        .container(platform("linux/arm64"))
        .await
        .unwrap()
        .with_mounted_directory("/out", empty)
        .unwrap()
        .with_exec(["build-arch", "/out/tool", "0"]);

    let out = h.engine.directory(&built, "/out").await.unwrap();
    assert_eq!(h.engine.entries(&out, "/").await.unwrap(), vec!["tool"]);
    assert_eq!(
        h.engine.read_file(&out, "/tool").await.unwrap(),
        b"aarch64".to_vec()
    );

    // The rootfs itself is untouched by writes under the mount
    let root = h.engine.rootfs(&built).await.unwrap();
    assert!(h.engine.read_file(&root, "/out/tool").await.is_err());

    // Later steps see the mount as the previous step left it
    let next = built.with_exec(["cat", "/out/tool"]);
    assert_eq!(h.engine.stdout(&next).await.unwrap(), "aarch64");
}

#[tokio::test]
async fn env_and_workdir_reach_the_command() {
    let h = harness();
    let c = h
        .engine
        .container(platform("linux/amd64"))
        .await
        .unwrap()
        .with_env("GREETING", "hello")
        .with_workdir("/src")
        .with_exec(["printenv", "GREETING"]);

    let synced = h.engine.sync(&c).await.unwrap();
    assert_eq!(synced.workdir(), Some("/src"));
    assert_eq!(h.engine.stdout(&c).await.unwrap(), "hello\n");
}

#[tokio::test]
async fn identical_definitions_run_once() {
    let h = harness();
    let base = h.engine.container(platform("linux/arm64")).await.unwrap();

    let first = base.with_exec(["uname", "-m"]);
    let again = base.with_exec(["uname", "-m"]);

    assert_eq!(first.digest(), again.digest());
    assert_eq!(h.engine.stdout(&first).await.unwrap(), "aarch64\n");
    assert_eq!(h.engine.stdout(&first).await.unwrap(), "aarch64\n");
    assert_eq!(h.engine.stdout(&again).await.unwrap(), "aarch64\n");
    assert_eq!(h.calls(), 1);
}

#[tokio::test]
async fn reading_output_without_a_command_is_an_error() {
    let h = harness();
    let c = h.engine.container(platform("linux/amd64")).await.unwrap();

    let err = h.engine.stdout(&c).await.unwrap_err();
    assert!(matches!(err, XplatError::User(_)));
}
