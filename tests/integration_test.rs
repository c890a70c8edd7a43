use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const ENV_KEYS: &[&str] = &[
    "GITHUB_TOKEN",
    "GITHUB_USER",
    "GITHUB_REPO",
    "GITHUB_RUN_ID",
    "PLATFORMS",
    "GENERIC_REGISTRY",
    "GENERIC_NAMESPACE",
    "GENERIC_USERNAME",
    "GENERIC_PASSWORD",
    "HUAWEI_SWR_ACCESS_KEY",
    "HUAWEI_SWR_SECRET_KEY",
    "HUAWEI_SWR_REGION",
    "LOG_LEVEL",
    "DEBUG",
];

// Command with a clean environment and an empty config file, so results do
// not depend on the machine running the tests
fn porter(config_dir: &TempDir) -> Result<Command> {
    let config_path = config_dir.path().join("config.toml");
    if !config_path.exists() {
        fs::write(&config_path, "")?;
    }
    let mut cmd = Command::cargo_bin("image-porter")?;
    for key in ENV_KEYS {
        cmd.env_remove(key);
    }
    cmd.arg("--config").arg(config_path);
    Ok(cmd)
}

#[test]
fn test_version_command() -> Result<()> {
    let mut cmd = Command::cargo_bin("image-porter")?;
    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("image-porter 0.1.0"));
    Ok(())
}

#[test]
fn test_version_subcommand() -> Result<()> {
    let mut cmd = Command::cargo_bin("image-porter")?;
    cmd.arg("version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("image-porter 0.1.0"));
    Ok(())
}

#[test]
fn test_help_command() -> Result<()> {
    let mut cmd = Command::cargo_bin("image-porter")?;
    cmd.arg("--help");
    cmd.assert().success().stdout(predicate::str::contains(
        "Mirror container images from foreign registries",
    ));
    Ok(())
}

#[test]
fn test_sync_help() -> Result<()> {
    let mut cmd = Command::cargo_bin("image-porter")?;
    cmd.arg("sync").arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--github-token"))
        .stdout(predicate::str::contains("--registry-password"));
    Ok(())
}

#[test]
fn test_transform_gcr_image() -> Result<()> {
    let dir = TempDir::new()?;
    let mut cmd = porter(&dir)?;
    cmd.args([
        "transform",
        "gcr.io/google-containers/pause:3.2",
        "--registry",
        "registry.example.com",
        "--namespace",
        "test",
    ]);
    cmd.assert().success().stdout(predicate::str::contains(
        "gcr.io/google-containers/pause:3.2 -> registry.example.com/test/pause:3.2",
    ));
    Ok(())
}

#[test]
fn test_transform_reads_target_from_env() -> Result<()> {
    let dir = TempDir::new()?;
    let mut cmd = porter(&dir)?;
    cmd.env("GENERIC_REGISTRY", "registry.example.com")
        .env("GENERIC_NAMESPACE", "mirror")
        .args(["transform", "quay.io/coreos/etcd:v3.5.0"]);
    cmd.assert().success().stdout(predicate::str::contains(
        "-> registry.example.com/mirror/etcd:v3.5.0",
    ));
    Ok(())
}

#[test]
fn test_config_file_wins_over_env() -> Result<()> {
    let dir = TempDir::new()?;
    fs::write(
        dir.path().join("config.toml"),
        r#"
[registries.target]
registry = "file.example.com"
namespace = "filens"
"#,
    )?;

    let mut cmd = porter(&dir)?;
    cmd.env("GENERIC_REGISTRY", "env.example.com")
        .env("GENERIC_NAMESPACE", "envns")
        .args(["transform", "quay.io/coreos/etcd:v3.5.0"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "-> file.example.com/filens/etcd:v3.5.0",
        ))
        .stdout(predicate::str::contains("env.example.com").not());
    Ok(())
}

#[test]
fn test_flags_win_over_config_file() -> Result<()> {
    let dir = TempDir::new()?;
    fs::write(
        dir.path().join("config.toml"),
        r#"
[registries.target]
registry = "file.example.com"
namespace = "filens"
"#,
    )?;

    let mut cmd = porter(&dir)?;
    cmd.args([
        "transform",
        "quay.io/coreos/etcd:v3.5.0",
        "--namespace",
        "flagns",
    ]);
    cmd.assert().success().stdout(predicate::str::contains(
        "-> file.example.com/flagns/etcd:v3.5.0",
    ));
    Ok(())
}

#[test]
fn test_transform_unsupported_registry() -> Result<()> {
    let dir = TempDir::new()?;
    let mut cmd = porter(&dir)?;
    cmd.args(["transform", "nginx:latest"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("unsupported registry"));
    Ok(())
}

#[test]
fn test_transform_with_configured_rules() -> Result<()> {
    let dir = TempDir::new()?;
    fs::write(
        dir.path().join("config.toml"),
        r#"
[[rules]]
pattern = "^docker.io"
namespace = "docker"

[registries.target]
registry = "registry.example.com"
namespace = "test"
"#,
    )?;

    let mut cmd = porter(&dir)?;
    cmd.args(["transform", "nginx:latest"]);
    cmd.assert().success().stdout(predicate::str::contains(
        "-> registry.example.com/test/nginx:latest",
    ));
    Ok(())
}

#[test]
fn test_invalid_config_is_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    fs::write(dir.path().join("config.toml"), "platforms = \"linux\"\n")?;

    let mut cmd = porter(&dir)?;
    cmd.args(["transform", "gcr.io/google-containers/pause:3.2"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
    Ok(())
}

#[test]
fn test_missing_config_file() -> Result<()> {
    let mut cmd = Command::cargo_bin("image-porter")?;
    cmd.args(["--config", "/nonexistent/image-porter.toml", "transform", "gcr.io/x/y:1"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
    Ok(())
}

#[test]
fn test_sync_requires_github_token() -> Result<()> {
    let dir = TempDir::new()?;
    let mut cmd = porter(&dir)?;
    cmd.args(["sync", "--github-user", "octo", "--github-repo", "mirror"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("GitHub token is not configured"));
    Ok(())
}
