//! Docker daemon access through the Engine API

use crate::auth::RegistryCredentials;
use crate::error::{ErrorKind, PorterError, Result};
use crate::manifest::PlatformDescriptor;
use crate::platform::Platform;
use crate::reference::ImageReference;
use bollard::auth::DockerCredentials;
use bollard::image::{BuildImageOptions, PushImageOptions};
use bollard::Docker;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::io::Write;
use tar::Builder;
use tracing::{debug, error, info};

const HUB_AUTH_SERVER: &str = "https://index.docker.io/v1/";

/// Dockerfile that re-tags `source` without modification
pub fn dockerfile_for(source: &ImageReference) -> String {
    format!("FROM {}\n", source)
}

/// Gzipped tar build context holding a single `Dockerfile`.
pub fn build_context(dockerfile: &str) -> Result<Vec<u8>> {
    let context_error =
        |e: std::io::Error| PorterError::wrap(ErrorKind::Build, "failed to create build context", e);

    let mut tar_data = Vec::new();
    {
        let mut tar = Builder::new(&mut tar_data);
        let mut header = tar::Header::new_gnu();
        header.set_path("Dockerfile").map_err(context_error)?;
        header.set_size(dockerfile.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
        header.set_cksum();
        tar.append(&header, dockerfile.as_bytes())
            .map_err(context_error)?;
        tar.finish().map_err(context_error)?;
    }

    debug!("Build context sha256:{}", sha256::digest(&tar_data));

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_data).map_err(context_error)?;
    encoder.finish().map_err(context_error)
}

/// Connected Docker daemon
#[derive(Clone)]
pub struct DockerDaemon {
    docker: Docker,
}

impl DockerDaemon {
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| PorterError::system("failed to connect to the Docker daemon", e))?;
        Ok(Self { docker })
    }

    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| PorterError::system("Docker daemon is not reachable", e))?;
        Ok(())
    }

    /// Platform of a locally cached image, `None` when it is not present.
    pub async fn inspect_platform(
        &self,
        image: &ImageReference,
    ) -> Result<Option<PlatformDescriptor>> {
        let name = image.to_string();
        match self.docker.inspect_image(&name).await {
            Ok(inspect) => Ok(Some(PlatformDescriptor {
                architecture: inspect.architecture.unwrap_or_default(),
                os: inspect.os.unwrap_or_default(),
                variant: inspect.variant,
            })),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Image {} not present locally", name);
                Ok(None)
            }
            Err(e) => Err(PorterError::wrap(
                ErrorKind::Probe,
                "failed to inspect local image",
                e,
            )
            .with_context("source_image", image)),
        }
    }

    /// Build `target` from `source` for one platform through the daemon.
    pub async fn build_single(
        &self,
        source: &ImageReference,
        target: &ImageReference,
        platform: &Platform,
        credentials: &RegistryCredentials,
    ) -> Result<()> {
        let dockerfile = dockerfile_for(source);
        let context = build_context(&dockerfile)?;

        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: target.to_string(),
            platform: platform.to_string(),
            pull: true,
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let registry_auth: Option<HashMap<String, DockerCredentials>> =
            credentials.to_docker_credentials().map(|creds| {
                let server = if credentials.registry.is_empty() {
                    HUB_AUTH_SERVER.to_string()
                } else {
                    credentials.registry.clone()
                };
                HashMap::from([(server, creds)])
            });

        info!("Building {} for {}", target, platform);
        let mut stream = Box::pin(self.docker.build_image(
            options,
            registry_auth,
            Some(context.into()),
        ));

        while let Some(event) = stream.next().await {
            let event = event.map_err(|e| {
                PorterError::build_caused("image build failed", e).with_context("stage", "build")
            })?;
            if let Some(message) = event.error {
                error!("Build error: {}", message);
                return Err(PorterError::build(format!("image build failed: {}", message))
                    .with_context("stage", "build"));
            }
            if let Some(line) = event.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    debug!("{}", line);
                }
            }
        }

        info!("Built {}", target);
        Ok(())
    }

    /// Push a previously built image.
    pub async fn push(
        &self,
        target: &ImageReference,
        credentials: &RegistryCredentials,
    ) -> Result<()> {
        let name = target.name();
        let tag = target
            .tag()
            .unwrap_or(crate::constants::reference::DEFAULT_TAG)
            .to_string();

        info!("Pushing {}:{}", name, tag);
        let mut stream = Box::pin(self.docker.push_image(
            &name,
            Some(PushImageOptions { tag }),
            credentials.to_docker_credentials(),
        ));

        while let Some(event) = stream.next().await {
            let event = event.map_err(|e| {
                PorterError::build_caused("image push failed", e).with_context("stage", "push")
            })?;
            if let Some(message) = event.error {
                error!("Push error: {}", message);
                return Err(PorterError::build(format!("image push failed: {}", message))
                    .with_context("stage", "push"));
            }
            if let Some(status) = event.status {
                debug!("{} {}", status, event.progress.unwrap_or_default());
            }
        }

        info!("Pushed {}", target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_dockerfile_for() {
        let source = ImageReference::normalize("gcr.io/google-containers/pause:3.2").unwrap();
        assert_eq!(
            dockerfile_for(&source),
            "FROM gcr.io/google-containers/pause:3.2\n"
        );
    }

    #[test]
    fn test_build_context_contains_dockerfile() {
        let context = build_context("FROM quay.io/coreos/etcd:v3.5.0\n").unwrap();

        let mut archive = tar::Archive::new(GzDecoder::new(context.as_slice()));
        let mut entries = archive.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();
        assert_eq!(entry.path().unwrap().to_str(), Some("Dockerfile"));

        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        assert_eq!(content, "FROM quay.io/coreos/etcd:v3.5.0\n");
        assert!(entries.next().is_none());
    }
}
