use crate::auth::RegistryCredentials;
use crate::error::{ErrorKind, PorterError, Result};
use crate::manifest::{clean_platforms, platform_from_config, PlatformDescriptor};
use crate::platform::PlatformSet;
use crate::reference::ImageReference;
use oci_distribution::manifest::OciManifest;
use oci_distribution::{Client, Reference};
use tracing::{debug, info};

#[cfg(test)]
mod tests;

/// Read-only client for manifest lookups against the source registry
pub struct RegistryClient {
    client: Client,
}

impl RegistryClient {
    pub fn new() -> Self {
        let client = Client::new(oci_distribution::client::ClientConfig::default());
        Self { client }
    }

    /// Fetch the manifest for an image and extract available platforms
    pub async fn get_image_platforms(
        &self,
        image: &ImageReference,
        credentials: &RegistryCredentials,
    ) -> Result<PlatformSet> {
        let reference = to_oci_reference(image)?;
        let auth = credentials.to_registry_auth();

        debug!("Fetching platforms for {}", reference);

        let (manifest, digest) = self
            .client
            .pull_manifest(&reference, &auth)
            .await
            .map_err(|e| probe_error("failed to fetch manifest", image, e))?;
        debug!("Manifest digest: {}", digest);

        let descriptors = match manifest {
            OciManifest::ImageIndex(index) => index
                .manifests
                .iter()
                .filter_map(|entry| entry.platform.as_ref())
                .map(PlatformDescriptor::from)
                .collect::<Vec<_>>(),
            OciManifest::Image(image_manifest) => {
                let mut config = Vec::new();
                self.client
                    .pull_blob(&reference, &image_manifest.config, &mut config)
                    .await
                    .map_err(|e| probe_error("failed to fetch image config", image, e))?;
                let descriptor = platform_from_config(&config)
                    .map_err(|e| probe_error("failed to parse image config", image, e))?;
                vec![descriptor]
            }
        };

        let platforms = clean_platforms(&descriptors);
        if platforms.is_empty() {
            return Err(PorterError::probe("manifest lists no usable platform")
                .with_context("source_image", image));
        }

        info!("Found platforms: {}", platforms);
        Ok(platforms)
    }
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

fn probe_error<E>(message: &str, image: &ImageReference, source: E) -> PorterError
where
    E: std::error::Error + Send + Sync + 'static,
{
    PorterError::wrap(ErrorKind::Probe, message, source).with_context("source_image", image)
}

/// Convert a normalized reference into the registry client's form.
pub fn to_oci_reference(image: &ImageReference) -> Result<Reference> {
    image.to_string().parse::<Reference>().map_err(|e| {
        PorterError::wrap(ErrorKind::Validation, "unparseable image reference", e)
            .with_context("image", image)
    })
}
