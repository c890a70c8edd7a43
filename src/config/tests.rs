use super::*;
use crate::error::ErrorKind;
use std::collections::HashMap;
use tempfile::TempDir;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.rules(), default_rules());
    assert_eq!(
        config.default_platforms().unwrap().to_string(),
        "linux/amd64,linux/arm64"
    );
    assert_eq!(config.target_registry(), "");
    assert_eq!(config.log_level(), "info");
    assert!(config.allow_probe_fallback());
    assert!(config.registries.huawei_swr.is_none());
    assert!(config.validate().is_ok());
}

#[test]
fn test_default_rules_have_no_hub_entry() {
    let rules = default_rules();
    assert_eq!(rules.len(), 5);
    assert!(rules.iter().all(|r| !r.pattern.contains("docker.io")));
}

#[test]
fn test_parse_toml() {
    let config = Config::from_toml(
        r#"
platforms = "linux/amd64"

[[rules]]
pattern = "^quay.io"
namespace = "quay"

[registries.target]
registry = "registry.example.com"
namespace = "test"
username = "robot"
password = "s3cr3tpassw0rd"

[build]
allow_probe_fallback = false
"#,
    )
    .unwrap();

    assert_eq!(config.rules().len(), 1);
    assert_eq!(config.target_registry(), "registry.example.com");
    assert_eq!(config.target_namespace(), "test");
    assert_eq!(config.default_platforms().unwrap().len(), 1);
    assert!(!config.allow_probe_fallback());
}

#[test]
fn test_file_values_win_over_env() {
    let mut config = Config::from_toml(
        r#"
platforms = "linux/arm64"

[registries.target]
registry = "registry.example.com"
"#,
    )
    .unwrap();
    config.fill_from_env(env(&[
        ("PLATFORMS", "linux/amd64"),
        ("GENERIC_REGISTRY", "other.example.com"),
        ("GENERIC_NAMESPACE", "mirror"),
        ("GITHUB_TOKEN", "ghp_abcdefghijklmnop"),
    ]));

    assert_eq!(config.platforms.as_deref(), Some("linux/arm64"));
    assert_eq!(config.target_registry(), "registry.example.com");
    assert_eq!(config.target_namespace(), "mirror");
    assert_eq!(config.github.token.as_deref(), Some("ghp_abcdefghijklmnop"));
}

#[test]
fn test_env_ignores_blank_values() {
    let mut config = Config::default();
    config.fill_from_env(env(&[("GENERIC_REGISTRY", "  "), ("LOG_LEVEL", "")]));
    assert!(config.registries.target.is_none());
    assert_eq!(config.log_level(), "info");
}

#[test]
fn test_debug_forces_debug_level() {
    let mut config = Config::default();
    config.fill_from_env(env(&[("LOG_LEVEL", "warn"), ("DEBUG", "true")]));
    assert_eq!(config.log_level(), "debug");
}

#[test]
fn test_swr_from_env() {
    let mut config = Config::default();
    config.fill_from_env(env(&[
        ("HUAWEI_SWR_ACCESS_KEY", "AKAKAKAKAKAK"),
        ("HUAWEI_SWR_SECRET_KEY", "SKSKSKSKSKSK"),
    ]));
    assert!(config.validate().is_ok());
    assert_eq!(config.swr_region(), DEFAULT_SWR_REGION);
}

#[test]
fn test_incomplete_swr_section_is_rejected() {
    let config = Config::from_toml(
        r#"
[registries.huawei_swr]
access_key = "AKAKAKAKAKAK"
"#,
    )
    .unwrap();
    let err = config.validate().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.message().contains("secret_key"));
}

#[test]
fn test_invalid_rule_is_config_error() {
    let config = Config::from_toml(
        r#"
[[rules]]
pattern = "^quay.io("
namespace = "quay"
"#,
    )
    .unwrap();
    assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::Config);
}

#[test]
fn test_invalid_platforms_is_config_error() {
    let config = Config {
        platforms: Some("amd64".to_string()),
        ..Default::default()
    };
    assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::Config);
}

#[test]
fn test_load_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "platforms = \"linux/amd64\"\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.platforms.as_deref(), Some("linux/amd64"));
}

#[test]
fn test_load_missing_explicit_file() {
    let dir = TempDir::new().unwrap();
    let err = Config::load(Some(&dir.path().join("missing.toml"))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.context().contains_key("path"));
}

#[test]
fn test_build_log_url() {
    let mut config = Config::default();
    assert!(config.build_log_url().is_none());
    config.fill_from_env(env(&[
        ("GITHUB_USER", "octo"),
        ("GITHUB_REPO", "mirror"),
        ("GITHUB_RUN_ID", "42"),
    ]));
    assert_eq!(
        config.build_log_url().as_deref(),
        Some("https://github.com/octo/mirror/actions/runs/42")
    );
}

#[test]
fn test_redacted_masks_secrets() {
    let mut config = Config::default();
    config.fill_from_env(env(&[
        ("GITHUB_TOKEN", "ghp_abcdefghijklmnop"),
        ("GENERIC_REGISTRY", "registry.example.com"),
        ("GENERIC_PASSWORD", "short"),
    ]));
    let safe = config.redacted();
    assert_eq!(safe.github.token.as_deref(), Some("ghp_****mnop"));
    let target = safe.registries.target.unwrap();
    assert_eq!(target.password.as_deref(), Some("****"));
    assert_eq!(target.registry, "registry.example.com");
}
