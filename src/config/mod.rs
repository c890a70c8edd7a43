use crate::constants::platform::DEFAULT_REQUESTED;
use crate::error::{mask_sensitive, PorterError, Result};
use crate::platform::PlatformSet;
use crate::reference::RewriteRuleSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

#[cfg(test)]
mod tests;

/// Region used when SWR credentials come from the environment without one
pub const DEFAULT_SWR_REGION: &str = "cn-southwest-2";

/// Application configuration.
///
/// Values are layered: command line flags over the config file over the
/// environment over built-in defaults. Optional fields stay `None` until one
/// of the layers provides them; accessors supply the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Comma separated platforms built when a request names none
    pub platforms: Option<String>,

    /// Ordered rewrite rules, first match wins
    pub rules: Option<Vec<RuleConfig>>,

    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub registries: RegistriesConfig,

    #[serde(default)]
    pub app: AppConfig,

    #[serde(default)]
    pub build: BuildConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleConfig {
    pub pattern: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHubConfig {
    pub token: Option<String>,
    pub user: Option<String>,
    pub repo: Option<String>,
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistriesConfig {
    /// Registry the mirrored images are pushed to
    pub target: Option<TargetRegistryConfig>,

    /// Huawei Cloud SWR credentials for the visibility hook
    pub huawei_swr: Option<SwrConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetRegistryConfig {
    #[serde(default)]
    pub registry: String,
    #[serde(default)]
    pub namespace: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwrConfig {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub log_level: Option<String>,
    pub debug: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Assume a default platform when the upstream image cannot be probed
    pub allow_probe_fallback: Option<bool>,

    /// BuildKit image used when creating the multi-platform builder
    pub buildkit_image: Option<String>,
}

pub fn default_rules() -> Vec<RuleConfig> {
    [
        ("^gcr.io", ""),
        ("^k8s.gcr.io", "google-containers"),
        ("^registry.k8s.io", "google-containers"),
        ("^quay.io", "quay"),
        ("^ghcr.io", "ghcr"),
    ]
    .into_iter()
    .map(|(pattern, namespace)| RuleConfig {
        pattern: pattern.to_string(),
        namespace: namespace.to_string(),
    })
    .collect()
}

impl Config {
    /// Load configuration from `path`, or the default location when `None`.
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// config file is not.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::from_file(&default)?,
                _ => Config::default(),
            },
        };
        config.fill_from_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// `$XDG_CONFIG_HOME/image-porter/config.toml` or the platform equivalent
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("image-porter").join("config.toml"))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PorterError::wrap(
                crate::error::ErrorKind::Config,
                "failed to read config file",
                e,
            )
            .with_context("path", path.display())
        })?;
        debug!("Loaded config from {}", path.display());
        Self::from_toml(&content).map_err(|e| e.with_context("path", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            PorterError::wrap(crate::error::ErrorKind::Config, "failed to parse config", e)
        })
    }

    /// Fill every value still unset from the environment.
    pub fn fill_from_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        fill(&mut self.platforms, get("PLATFORMS"));

        fill(&mut self.github.token, get("GITHUB_TOKEN"));
        fill(&mut self.github.user, get("GITHUB_USER"));
        fill(&mut self.github.repo, get("GITHUB_REPO"));
        fill(&mut self.github.run_id, get("GITHUB_RUN_ID"));

        let registry = get("GENERIC_REGISTRY");
        let namespace = get("GENERIC_NAMESPACE");
        let username = get("GENERIC_USERNAME");
        let password = get("GENERIC_PASSWORD");
        if registry.is_some() || namespace.is_some() || username.is_some() || password.is_some()
        {
            let target = self.registries.target.get_or_insert_with(Default::default);
            if target.registry.is_empty() {
                target.registry = registry.unwrap_or_default();
            }
            if target.namespace.is_empty() {
                target.namespace = namespace.unwrap_or_default();
            }
            fill(&mut target.username, username);
            fill(&mut target.password, password);
        }

        let access_key = get("HUAWEI_SWR_ACCESS_KEY");
        let secret_key = get("HUAWEI_SWR_SECRET_KEY");
        let region = get("HUAWEI_SWR_REGION");
        if access_key.is_some() || secret_key.is_some() || region.is_some() {
            let swr = self.registries.huawei_swr.get_or_insert_with(Default::default);
            fill(&mut swr.access_key, access_key);
            fill(&mut swr.secret_key, secret_key);
            fill(&mut swr.region, region);
        }

        fill(&mut self.app.log_level, get("LOG_LEVEL"));
        fill(
            &mut self.app.debug,
            get("DEBUG").map(|v| v.eq_ignore_ascii_case("true") || v == "1"),
        );
    }

    /// Check everything that would otherwise fail halfway through a run.
    pub fn validate(&self) -> Result<()> {
        self.rule_set()?;
        self.default_platforms()?;

        if let Some(swr) = &self.registries.huawei_swr {
            let missing: Vec<&str> = [
                ("access_key", &swr.access_key),
                ("secret_key", &swr.secret_key),
            ]
            .into_iter()
            .filter(|(_, value)| value.as_deref().map_or(true, str::is_empty))
            .map(|(key, _)| key)
            .collect();
            if !missing.is_empty() {
                return Err(PorterError::config(format!(
                    "huawei_swr section is incomplete, missing {}",
                    missing.join(", ")
                )));
            }
        }
        Ok(())
    }

    pub fn swr_region(&self) -> &str {
        self.registries
            .huawei_swr
            .as_ref()
            .and_then(|swr| swr.region.as_deref())
            .unwrap_or(DEFAULT_SWR_REGION)
    }

    pub fn rules(&self) -> Vec<RuleConfig> {
        self.rules.clone().unwrap_or_else(default_rules)
    }

    pub fn rule_set(&self) -> Result<RewriteRuleSet> {
        RewriteRuleSet::from_pairs(
            self.rules()
                .into_iter()
                .map(|rule| (rule.pattern, rule.namespace)),
        )
    }

    pub fn default_platforms(&self) -> Result<PlatformSet> {
        let list = self.platforms.as_deref().unwrap_or(DEFAULT_REQUESTED);
        let set = PlatformSet::parse_list(list)
            .map_err(|e| PorterError::config(format!("invalid platforms setting: {}", e.message())))?;
        if set.is_empty() {
            return Err(PorterError::config("platforms setting is empty"));
        }
        Ok(set)
    }

    pub fn target_registry(&self) -> &str {
        self.registries
            .target
            .as_ref()
            .map(|t| t.registry.as_str())
            .unwrap_or_default()
    }

    pub fn target_namespace(&self) -> &str {
        self.registries
            .target
            .as_ref()
            .map(|t| t.namespace.as_str())
            .unwrap_or_default()
    }

    pub fn log_level(&self) -> &str {
        if self.app.debug.unwrap_or(false) {
            return "debug";
        }
        self.app.log_level.as_deref().unwrap_or("info")
    }

    pub fn allow_probe_fallback(&self) -> bool {
        self.build.allow_probe_fallback.unwrap_or(true)
    }

    /// Link to the logs of the current run, when running under Actions
    pub fn build_log_url(&self) -> Option<String> {
        match (&self.github.user, &self.github.repo, &self.github.run_id) {
            (Some(user), Some(repo), Some(run_id)) => Some(format!(
                "https://github.com/{}/{}/actions/runs/{}",
                user, repo, run_id
            )),
            _ => None,
        }
    }

    /// Copy with secrets masked, for logging
    pub fn redacted(&self) -> Self {
        let mut safe = self.clone();
        safe.github.token = safe.github.token.as_deref().map(mask_sensitive);
        if let Some(target) = safe.registries.target.as_mut() {
            target.password = target.password.as_deref().map(mask_sensitive);
        }
        if let Some(swr) = safe.registries.huawei_swr.as_mut() {
            swr.access_key = swr.access_key.as_deref().map(mask_sensitive);
            swr.secret_key = swr.secret_key.as_deref().map(mask_sensitive);
        }
        safe
    }
}

fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}
