//! Platform detection service
//!
//! Learns which platforms the upstream image ships, trying the local daemon
//! cache before the source registry.

use crate::auth::DockerConfig;
use crate::constants::platform::FALLBACK;
use crate::docker::DockerDaemon;
use crate::error::{PorterError, Result};
use crate::manifest::clean_platforms;
use crate::platform::{Platform, PlatformSet, ProbeOrigin};
use crate::reference::ImageReference;
use crate::registry::RegistryClient;
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// One place the upstream platform list can be read from
#[async_trait]
pub trait PlatformSource: Send + Sync {
    fn origin(&self) -> ProbeOrigin;

    /// Platforms of `image`. An empty set means this source knows nothing.
    async fn platforms(&self, image: &ImageReference) -> Result<PlatformSet>;
}

/// Image already present in the local daemon
pub struct LocalDaemonSource {
    daemon: DockerDaemon,
}

impl LocalDaemonSource {
    pub fn new(daemon: DockerDaemon) -> Self {
        Self { daemon }
    }
}

#[async_trait]
impl PlatformSource for LocalDaemonSource {
    fn origin(&self) -> ProbeOrigin {
        ProbeOrigin::LocalDaemon
    }

    async fn platforms(&self, image: &ImageReference) -> Result<PlatformSet> {
        let descriptor = self.daemon.inspect_platform(image).await?;
        Ok(clean_platforms(descriptor.iter()))
    }
}

/// Manifest lookup against the source registry
pub struct RegistrySource {
    client: RegistryClient,
    docker_config: DockerConfig,
}

impl RegistrySource {
    pub fn new(client: RegistryClient, docker_config: DockerConfig) -> Self {
        Self {
            client,
            docker_config,
        }
    }
}

#[async_trait]
impl PlatformSource for RegistrySource {
    fn origin(&self) -> ProbeOrigin {
        ProbeOrigin::Registry
    }

    async fn platforms(&self, image: &ImageReference) -> Result<PlatformSet> {
        let credentials = self.docker_config.credentials_for(image.registry_host());
        self.client.get_image_platforms(image, &credentials).await
    }
}

/// Platforms found for an image and where they came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub platforms: PlatformSet,
    pub origin: ProbeOrigin,
}

/// Service for detecting available platforms
pub struct ArchitectureProber {
    sources: Vec<Box<dyn PlatformSource>>,
    allow_fallback: bool,
}

impl ArchitectureProber {
    pub fn new(sources: Vec<Box<dyn PlatformSource>>, allow_fallback: bool) -> Self {
        Self {
            sources,
            allow_fallback,
        }
    }

    /// Ask each source in turn; the first non-empty answer wins.
    pub async fn probe(&self, image: &ImageReference) -> Result<ProbeResult> {
        info!("Detecting platforms of {}", image);

        let mut failures = Vec::new();
        for source in &self.sources {
            match source.platforms(image).await {
                Ok(platforms) if !platforms.is_empty() => {
                    info!("Detected platforms via {}: {}", source.origin(), platforms);
                    return Ok(ProbeResult {
                        platforms,
                        origin: source.origin(),
                    });
                }
                Ok(_) => debug!("No platform information from {}", source.origin()),
                Err(e) => {
                    debug!("Platform lookup via {} failed: {}", source.origin(), e);
                    failures.push(format!("{}: {}", source.origin(), e));
                }
            }
        }

        if !self.allow_fallback {
            return Err(PorterError::probe("could not determine upstream platforms")
                .with_context("source_image", image)
                .with_context("attempts", failures.join("; ")));
        }

        warn!(
            "Could not determine platforms of {}, assuming {} (not verified upstream)",
            image, FALLBACK
        );
        let platforms = std::iter::once(Platform::parse(FALLBACK)?).collect();
        Ok(ProbeResult {
            platforms,
            origin: ProbeOrigin::Fallback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    struct StaticSource {
        origin: ProbeOrigin,
        answer: std::result::Result<&'static str, &'static str>,
    }

    #[async_trait]
    impl PlatformSource for StaticSource {
        fn origin(&self) -> ProbeOrigin {
            self.origin
        }

        async fn platforms(&self, _image: &ImageReference) -> Result<PlatformSet> {
            match self.answer {
                Ok(list) => PlatformSet::parse_list(list),
                Err(message) => Err(PorterError::probe(message)),
            }
        }
    }

    fn source(
        origin: ProbeOrigin,
        answer: std::result::Result<&'static str, &'static str>,
    ) -> Box<dyn PlatformSource> {
        Box::new(StaticSource { origin, answer })
    }

    fn image() -> ImageReference {
        ImageReference::normalize("quay.io/coreos/etcd:v3.5.0").unwrap()
    }

    #[tokio::test]
    async fn test_local_daemon_answer_wins() {
        let prober = ArchitectureProber::new(
            vec![
                source(ProbeOrigin::LocalDaemon, Ok("linux/amd64")),
                source(ProbeOrigin::Registry, Ok("linux/amd64,linux/arm64")),
            ],
            true,
        );
        let result = prober.probe(&image()).await.unwrap();
        assert_eq!(result.origin, ProbeOrigin::LocalDaemon);
        assert_eq!(result.platforms.len(), 1);
    }

    #[tokio::test]
    async fn test_registry_used_when_not_cached() {
        let prober = ArchitectureProber::new(
            vec![
                source(ProbeOrigin::LocalDaemon, Ok("")),
                source(ProbeOrigin::Registry, Ok("linux/amd64,linux/arm64")),
            ],
            true,
        );
        let result = prober.probe(&image()).await.unwrap();
        assert_eq!(result.origin, ProbeOrigin::Registry);
        assert_eq!(result.platforms.to_string(), "linux/amd64,linux/arm64");
    }

    #[tokio::test]
    async fn test_fallback_is_flagged() {
        let prober = ArchitectureProber::new(
            vec![
                source(ProbeOrigin::LocalDaemon, Err("daemon down")),
                source(ProbeOrigin::Registry, Err("manifest unknown")),
            ],
            true,
        );
        let result = prober.probe(&image()).await.unwrap();
        assert!(result.origin.is_fallback());
        assert_eq!(result.platforms.to_string(), "linux/amd64");
    }

    #[tokio::test]
    async fn test_fallback_disabled_is_probe_error() {
        let prober = ArchitectureProber::new(
            vec![source(ProbeOrigin::Registry, Err("manifest unknown"))],
            false,
        );
        let err = prober.probe(&image()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Probe);
        assert!(err.context()["attempts"].contains("manifest unknown"));
    }
}
