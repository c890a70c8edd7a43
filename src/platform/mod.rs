//! Platform sets and build strategy selection
//!
//! The requested platforms are intersected with what the upstream image
//! actually ships. One surviving platform is built through the daemon API,
//! several go through a multi-platform builder.

use crate::error::{PorterError, Result};
use std::fmt;
use tracing::{info, warn};

/// An `os/arch[/variant]` platform string, compared by exact equality
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Platform(String);

impl Platform {
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let parts: Vec<&str> = value.split('/').collect();
        if !(2..=3).contains(&parts.len()) || parts.iter().any(|p| p.is_empty()) {
            return Err(PorterError::validation(format!(
                "Invalid platform format: {}",
                value
            )));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn os(&self) -> &str {
        self.0.split('/').next().unwrap_or_default()
    }

    pub fn architecture(&self) -> &str {
        self.0.split('/').nth(1).unwrap_or_default()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Insertion-ordered set of platforms without duplicates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformSet {
    platforms: Vec<Platform>,
}

impl PlatformSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a comma separated list such as `linux/amd64, linux/arm64`.
    pub fn parse_list(list: &str) -> Result<Self> {
        let mut set = Self::new();
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            set.insert(Platform::parse(item)?);
        }
        Ok(set)
    }

    /// Returns false when the platform was already present.
    pub fn insert(&mut self, platform: Platform) -> bool {
        if self.platforms.contains(&platform) {
            return false;
        }
        self.platforms.push(platform);
        true
    }

    pub fn contains(&self, platform: &Platform) -> bool {
        self.platforms.contains(platform)
    }

    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Platform> {
        self.platforms.iter()
    }

    pub fn first(&self) -> Option<&Platform> {
        self.platforms.first()
    }

    /// Members of `self` also in `other`, in `self`'s order.
    pub fn intersection(&self, other: &PlatformSet) -> PlatformSet {
        self.platforms
            .iter()
            .filter(|p| other.contains(p))
            .cloned()
            .collect()
    }

    /// Members of `self` not in `other`, in `self`'s order.
    pub fn difference(&self, other: &PlatformSet) -> PlatformSet {
        self.platforms
            .iter()
            .filter(|p| !other.contains(p))
            .cloned()
            .collect()
    }

    /// Comma joined form accepted by `--platform`.
    pub fn joined(&self) -> String {
        self.to_string()
    }
}

impl FromIterator<Platform> for PlatformSet {
    fn from_iter<I: IntoIterator<Item = Platform>>(iter: I) -> Self {
        let mut set = PlatformSet::new();
        for platform in iter {
            set.insert(platform);
        }
        set
    }
}

impl fmt::Display for PlatformSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.platforms.iter().map(Platform::as_str).collect();
        f.write_str(&joined.join(","))
    }
}

/// Where the upstream platform list came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOrigin {
    LocalDaemon,
    Registry,
    /// Nothing could be probed; a conservative default was assumed.
    Fallback,
}

impl ProbeOrigin {
    pub fn is_fallback(&self) -> bool {
        matches!(self, ProbeOrigin::Fallback)
    }
}

impl fmt::Display for ProbeOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOrigin::LocalDaemon => f.write_str("local daemon"),
            ProbeOrigin::Registry => f.write_str("registry manifest"),
            ProbeOrigin::Fallback => f.write_str("fallback default"),
        }
    }
}

/// Comparison of upstream and requested platforms for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchitectureReport {
    pub upstream: PlatformSet,
    pub requested: PlatformSet,
    pub resolved: PlatformSet,
    pub skipped: PlatformSet,
    pub origin: ProbeOrigin,
}

impl ArchitectureReport {
    pub fn new(requested: PlatformSet, upstream: PlatformSet, origin: ProbeOrigin) -> Self {
        let resolved = requested.intersection(&upstream);
        let skipped = requested.difference(&upstream);
        Self {
            upstream,
            requested,
            resolved,
            skipped,
            origin,
        }
    }

    pub fn is_multi_platform_upstream(&self) -> bool {
        self.upstream.len() > 1
    }
}

/// How the target image gets built and pushed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStrategy {
    /// Build through the daemon API for one platform.
    SinglePlatform(Platform),
    /// Build and push atomically with a multi-platform builder.
    MultiPlatform(PlatformSet),
}

impl BuildStrategy {
    pub fn platforms(&self) -> PlatformSet {
        match self {
            BuildStrategy::SinglePlatform(platform) => {
                std::iter::once(platform.clone()).collect()
            }
            BuildStrategy::MultiPlatform(platforms) => platforms.clone(),
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            BuildStrategy::SinglePlatform(_) => "single-platform (daemon API)",
            BuildStrategy::MultiPlatform(_) => "multi-platform (buildx)",
        }
    }
}

/// Intersect requested with upstream platforms and pick a build path.
pub fn select(
    requested: &PlatformSet,
    upstream: &PlatformSet,
    origin: ProbeOrigin,
) -> Result<(ArchitectureReport, BuildStrategy)> {
    info!("Upstream image platforms: {}", upstream);
    info!("Requested platforms: {}", requested);

    let report = ArchitectureReport::new(requested.clone(), upstream.clone(), origin);

    if report.resolved.is_empty() {
        return Err(PorterError::validation(format!(
            "upstream image supports none of the requested platforms (upstream: {}, requested: {})",
            upstream, requested
        ))
        .with_context("upstream_platforms", upstream)
        .with_context("requested_platforms", requested));
    }

    if !report.skipped.is_empty() {
        warn!(
            "Upstream image does not support {}, skipping",
            report.skipped
        );
    }

    let strategy = if report.resolved.len() == 1 {
        let platform = report
            .resolved
            .first()
            .cloned()
            .ok_or_else(|| PorterError::validation("no platform resolved"))?;
        BuildStrategy::SinglePlatform(platform)
    } else {
        BuildStrategy::MultiPlatform(report.resolved.clone())
    };

    info!("Selected {} build for {}", strategy.describe(), report.resolved);
    Ok((report, strategy))
}
