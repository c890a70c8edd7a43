//! Registry credentials
//!
//! Target registry credentials come from configuration. Source registries
//! are probed with whatever the local Docker config file holds for them,
//! falling back to anonymous access.

use base64::Engine;
use bollard::auth::DockerCredentials;
use oci_distribution::secrets::RegistryAuth;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};


/// Username/password pair for one registry
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub registry: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("registry", &self.registry)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .finish()
    }
}

impl RegistryCredentials {
    pub fn new(
        registry: impl Into<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            username: username.filter(|u| !u.is_empty()),
            password: password.filter(|p| !p.is_empty()),
        }
    }

    pub fn anonymous(registry: impl Into<String>) -> Self {
        Self::new(registry, None, None)
    }

    /// Anonymous unless both username and password are present
    pub fn is_anonymous(&self) -> bool {
        self.basic().is_none()
    }

    pub fn basic(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }

    /// Credentials for manifest lookups
    pub fn to_registry_auth(&self) -> RegistryAuth {
        match self.basic() {
            Some((user, pass)) => RegistryAuth::Basic(user.to_string(), pass.to_string()),
            None => RegistryAuth::Anonymous,
        }
    }

    /// Credentials for daemon pushes and pulls
    pub fn to_docker_credentials(&self) -> Option<DockerCredentials> {
        self.basic().map(|(user, pass)| DockerCredentials {
            username: Some(user.to_string()),
            password: Some(pass.to_string()),
            serveraddress: if self.registry.is_empty() {
                None
            } else {
                Some(self.registry.clone())
            },
            ..Default::default()
        })
    }
}

/// Docker config file structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DockerConfig {
    #[serde(default)]
    pub auths: HashMap<String, DockerAuthEntry>,
}

/// Entry in the Docker config auths section
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DockerAuthEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl DockerAuthEntry {
    /// Explicit username/password, or the decoded `auth` field
    pub fn to_credentials(&self, registry: &str) -> RegistryCredentials {
        if self.username.is_some() && self.password.is_some() {
            return RegistryCredentials::new(
                registry,
                self.username.clone(),
                self.password.clone(),
            );
        }

        let decoded = self
            .auth
            .as_ref()
            .and_then(|auth| base64::engine::general_purpose::STANDARD.decode(auth).ok())
            .and_then(|bytes| String::from_utf8(bytes).ok());
        match decoded.as_deref().and_then(|s| s.split_once(':')) {
            Some((user, pass)) => RegistryCredentials::new(
                registry,
                Some(user.to_string()),
                Some(pass.to_string()),
            ),
            None => RegistryCredentials::anonymous(registry),
        }
    }
}

impl DockerConfig {
    pub fn from_file(path: &Path) -> Option<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read Docker config at {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(config) => {
                debug!("Loaded Docker config from: {}", path.display());
                Some(config)
            }
            Err(e) => {
                warn!("Failed to parse Docker config at {}: {}", path.display(), e);
                None
            }
        }
    }

    /// First readable config among the usual locations
    pub fn discover() -> Self {
        config_paths()
            .into_iter()
            .filter(|path| path.exists())
            .find_map(|path| Self::from_file(&path))
            .unwrap_or_default()
    }

    /// Credentials stored for `registry`, trying the usual key spellings
    pub fn credentials_for(&self, registry: &str) -> RegistryCredentials {
        registry_variants(registry)
            .iter()
            .find_map(|variant| self.auths.get(variant))
            .map(|entry| entry.to_credentials(registry))
            .unwrap_or_else(|| RegistryCredentials::anonymous(registry))
    }
}

fn config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(docker_config) = std::env::var("DOCKER_CONFIG") {
        paths.push(PathBuf::from(docker_config).join("config.json"));
    }
    if let Ok(auth_file) = std::env::var("REGISTRY_AUTH_FILE") {
        paths.push(PathBuf::from(auth_file));
    }
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".docker/config.json"));
    }
    paths
}

fn registry_variants(registry: &str) -> Vec<String> {
    if registry.is_empty() || registry == "docker.io" || registry == "index.docker.io" {
        return vec![
            "docker.io".to_string(),
            "index.docker.io".to_string(),
            "https://index.docker.io/v1/".to_string(),
        ];
    }
    vec![
        registry.to_string(),
        format!("https://{}", registry),
        format!("https://{}/v1/", registry),
        format!("https://{}/v2/", registry),
    ]
}
