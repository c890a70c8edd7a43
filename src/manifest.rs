use crate::platform::{Platform, PlatformSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Platform fields of an image config blob or a manifest list entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformDescriptor {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl PlatformDescriptor {
    pub fn new(os: &str, architecture: &str, variant: Option<&str>) -> Self {
        Self {
            architecture: architecture.to_string(),
            os: os.to_string(),
            variant: variant.map(str::to_string),
        }
    }

    /// `os/arch`, plus the variant for 32-bit arm where it tells images apart.
    ///
    /// Returns `None` for entries with an empty or `unknown` field, such as
    /// attestation manifests.
    pub fn to_platform(&self) -> Option<Platform> {
        if self.os.is_empty() || self.architecture.is_empty() {
            return None;
        }
        let value = match self.variant.as_deref() {
            Some(variant) if self.architecture == "arm" && !variant.is_empty() => {
                format!("{}/{}/{}", self.os, self.architecture, variant)
            }
            _ => format!("{}/{}", self.os, self.architecture),
        };
        if value.contains("unknown") {
            debug!("Skipping platform {}", value);
            return None;
        }
        Platform::parse(&value).ok()
    }
}

impl From<&oci_distribution::manifest::Platform> for PlatformDescriptor {
    fn from(platform: &oci_distribution::manifest::Platform) -> Self {
        Self {
            architecture: platform.architecture.clone(),
            os: platform.os.clone(),
            variant: platform.variant.clone(),
        }
    }
}

/// Usable, de-duplicated platforms in first-seen order
pub fn clean_platforms<'a, I>(descriptors: I) -> PlatformSet
where
    I: IntoIterator<Item = &'a PlatformDescriptor>,
{
    descriptors
        .into_iter()
        .filter_map(PlatformDescriptor::to_platform)
        .collect()
}

/// Parse the platform fields out of an image config blob.
pub fn platform_from_config(config: &[u8]) -> serde_json::Result<PlatformDescriptor> {
    serde_json::from_slice(config)
}
