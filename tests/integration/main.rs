//! Integration tests for xplat

mod engine;
mod support;

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    /// Command isolated to a throwaway config file and state directory
    fn xplat(temp: &TempDir) -> Command {
        let config = temp.path().join("config.toml");
        if !config.exists() {
            let state = temp.path().join("state");
            std::fs::write(
                &config,
                format!("[engine]\nstate_dir = {:?}\n", state.display().to_string()),
            )
            .unwrap();
        }
        let mut cmd = cargo_bin_cmd!("xplat");
        cmd.env("XPLAT_CONFIG", &config).env_remove("RUST_LOG");
        cmd
    }

    #[test]
    fn help_displays() {
        let temp = TempDir::new().unwrap();
        xplat(&temp)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Multi-platform"));
    }

    #[test]
    fn version_displays() {
        let temp = TempDir::new().unwrap();
        xplat(&temp)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("xplat"));
    }

    #[test]
    fn platforms_lists_known_targets() {
        let temp = TempDir::new().unwrap();
        xplat(&temp)
            .args(["platforms", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("linux/amd64"))
            .stdout(predicate::str::contains("windows/amd64"));
    }

    #[test]
    fn platforms_parse_normalizes_aliases() {
        let temp = TempDir::new().unwrap();
        xplat(&temp)
            .args(["platforms", "parse", "linux/aarch64"])
            .assert()
            .success()
            .stdout(predicate::str::diff("linux/arm64\n"));
    }

    #[test]
    fn platforms_parse_rejects_unknown() {
        let temp = TempDir::new().unwrap();
        xplat(&temp)
            .args(["platforms", "parse", "windows98"])
            .assert()
            .failure()
            .stderr(predicate::str::contains(
                "unknown operating system or architecture",
            ))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn config_path() {
        let temp = TempDir::new().unwrap();
        xplat(&temp)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let temp = TempDir::new().unwrap();
        xplat(&temp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]"))
            .stdout(predicate::str::contains("[emulation]"));
    }

    #[test]
    fn config_set_persists() {
        let temp = TempDir::new().unwrap();
        xplat(&temp)
            .args(["config", "set", "build.parallelism", "4"])
            .assert()
            .success();

        xplat(&temp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("parallelism = 4"));
    }

    #[test]
    fn config_set_rejects_unknown_key() {
        let temp = TempDir::new().unwrap();
        xplat(&temp)
            .args(["config", "set", "general.nope", "1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn host_reports_and_closes() {
        let temp = TempDir::new().unwrap();
        xplat(&temp)
            .arg("host")
            .assert()
            .success()
            .stdout(predicate::str::contains("Container platform"))
            .stdout(
                predicate::str::contains("Host is ready to build")
                    .or(predicate::str::contains("Host cannot execute containers yet")),
            );
    }

    #[test]
    fn cache_list_empty() {
        let temp = TempDir::new().unwrap();
        xplat(&temp)
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cache volumes found."));
    }

    #[test]
    fn cache_info_missing_volume() {
        let temp = TempDir::new().unwrap();
        xplat(&temp)
            .args(["cache", "info", "never-created"])
            .assert()
            .failure();
    }

    #[test]
    fn inspect_missing_image_fails() {
        let temp = TempDir::new().unwrap();
        xplat(&temp)
            .args(["inspect", "team/missing:v1", "--platform", "linux/arm64"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn run_rejects_invalid_platform() {
        let temp = TempDir::new().unwrap();
        xplat(&temp)
            .args(["run", "--platform", "linux/m68k", "--", "uname", "-m"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("linux/m68k"));
    }
}
