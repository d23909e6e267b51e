//! Integration tests for Stagehand

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    // sha256("hello\n")
    const HELLO_SHA256: &str = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";

    fn stagehand() -> Command {
        cargo_bin_cmd!("stagehand")
    }

    /// A config that keeps every stagehand directory inside `dir`
    fn isolated_config(dir: &Path) -> PathBuf {
        let config = dir.join("config.toml");
        let content = format!(
            r#"
[stage]
build_stage = ["{root}/stage"]
lock_timeout_secs = 5
source_cache = "{root}/cache"
cmake_ext_build = "{root}/builds"
"#,
            root = dir.display()
        );
        std::fs::write(&config, content).unwrap();
        config
    }

    fn with_config(dir: &Path) -> Command {
        let mut cmd = stagehand();
        cmd.env("STAGEHAND_CONFIG", isolated_config(dir));
        cmd
    }

    fn tarball(dir: &Path) -> PathBuf {
        let build = dir.join("upstream");
        std::fs::create_dir_all(build.join("demo-1.0")).unwrap();
        std::fs::write(build.join("demo-1.0").join("configure"), "#!/bin/sh\n").unwrap();
        let archive = dir.join("demo-1.0.tar.gz");
        let status = std::process::Command::new("tar")
            .arg("-czf")
            .arg(&archive)
            .arg("-C")
            .arg(&build)
            .arg("demo-1.0")
            .status()
            .unwrap();
        assert!(status.success());
        archive
    }

    #[test]
    fn help_displays() {
        stagehand()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Usage"))
            .stdout(predicate::str::contains("checksum"));
    }

    #[test]
    fn version_displays() {
        stagehand()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("stagehand"));
    }

    #[test]
    fn config_path_follows_flag() {
        let dir = TempDir::new().unwrap();
        let config = isolated_config(dir.path());
        stagehand()
            .arg("--config")
            .arg(&config)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains(config.display().to_string()));
    }

    #[test]
    fn config_show() {
        let dir = TempDir::new().unwrap();
        with_config(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[stage]"))
            .stdout(predicate::str::contains("lock_timeout_secs = 5"));
    }

    #[test]
    fn config_set_persists() {
        let dir = TempDir::new().unwrap();
        with_config(dir.path())
            .args(["config", "set", "stage.checksum", "false"])
            .assert()
            .success();
        with_config(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("checksum = false"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("broken.toml");
        std::fs::write(&config, "[stage\n").unwrap();
        stagehand()
            .env("STAGEHAND_CONFIG", &config)
            .arg("root")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn root_is_created_inside_candidate() {
        let dir = TempDir::new().unwrap();
        with_config(dir.path())
            .arg("root")
            .assert()
            .success()
            .stdout(predicate::str::contains(
                dir.path().join("stage").display().to_string(),
            ));
    }

    #[test]
    fn stage_into_dest() {
        let dir = TempDir::new().unwrap();
        let archive = tarball(dir.path());
        let dest = dir.path().join("sources");

        with_config(dir.path())
            .arg("stage")
            .arg(format!("file://{}", archive.display()))
            .arg("--dest")
            .arg(&dest)
            .assert()
            .success();

        assert!(dest.join("configure").is_file());
        assert!(dest.join("demo-1.0.tar.gz").is_file());
    }

    #[test]
    fn stage_rejects_bad_checksum() {
        let dir = TempDir::new().unwrap();
        let archive = tarball(dir.path());

        with_config(dir.path())
            .arg("stage")
            .arg(format!("file://{}", archive.display()))
            .args(["--sha256", HELLO_SHA256])
            .assert()
            .failure()
            .stderr(predicate::str::contains("could not be staged"));
    }

    #[test]
    fn mirror_rejects_non_hex_digest() {
        let dir = TempDir::new().unwrap();
        let digest = format!("aé{}", &HELLO_SHA256[3..]);
        with_config(dir.path())
            .args(["mirror", "file:///srv/hello-1.0.txt", "--root"])
            .arg(dir.path().join("mirror"))
            .args(["--sha256", &digest])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid sha256 digest"));
    }

    #[test]
    fn stage_flags_need_a_single_url() {
        let dir = TempDir::new().unwrap();
        with_config(dir.path())
            .args(["stage", "file:///a.tgz", "file:///b.tgz", "--name", "x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--name can only be used with a single URL"));
    }

    #[test]
    fn checksum_prints_digest() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("hello.txt");
        std::fs::write(&file, "hello\n").unwrap();

        with_config(dir.path())
            .arg("checksum")
            .arg(format!("file://{}", file.display()))
            .assert()
            .success()
            .stdout(predicate::str::contains(HELLO_SHA256));
    }

    #[test]
    fn checksum_json_reports_errors() {
        let dir = TempDir::new().unwrap();
        with_config(dir.path())
            .args(["checksum", "--format", "json", "file:///no/such/file.tgz"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("\"error\""));
    }

    #[test]
    fn mirror_adds_archive() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("hello-1.0.txt");
        std::fs::write(&file, "hello\n").unwrap();
        let mirror = dir.path().join("mirror");

        with_config(dir.path())
            .arg("mirror")
            .arg(format!("file://{}", file.display()))
            .arg("--root")
            .arg(&mirror)
            .args(["--sha256", HELLO_SHA256])
            .assert()
            .success();

        assert!(mirror.join("hello").join("hello-1.0.txt").exists());
        assert!(mirror
            .join("_source-cache/archive/58")
            .join(format!("{}.txt", HELLO_SHA256))
            .is_file());
    }

    #[test]
    fn purge_dry_run_lists_generated_stages() {
        let dir = TempDir::new().unwrap();
        let config = isolated_config(dir.path());
        let root = stagehand()
            .env("STAGEHAND_CONFIG", &config)
            .arg("root")
            .output()
            .unwrap();
        let root = PathBuf::from(String::from_utf8(root.stdout).unwrap().trim());
        std::fs::create_dir_all(root.join("spack-stage-deadbeef")).unwrap();

        with_config(dir.path())
            .args(["purge", "--dry-run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("spack-stage-deadbeef"));
        assert!(root.join("spack-stage-deadbeef").is_dir());

        with_config(dir.path())
            .args(["purge", "--yes"])
            .assert()
            .success();
        assert!(!root.join("spack-stage-deadbeef").exists());
    }
}
