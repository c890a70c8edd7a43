/// Platform constants for container images
pub mod platform {
    /// Linux AMD64 platform identifier
    pub const LINUX_AMD64: &str = "linux/amd64";

    /// Linux ARM64 platform identifier
    pub const LINUX_ARM64: &str = "linux/arm64";

    /// Platform assumed when the upstream image cannot be probed
    pub const FALLBACK: &str = LINUX_AMD64;

    /// Platforms requested when neither the ticket nor the config names any
    pub const DEFAULT_REQUESTED: &str = "linux/amd64,linux/arm64";
}

/// Image reference constants
pub mod reference {
    /// Registry assumed for short names
    pub const DEFAULT_REGISTRY: &str = "docker.io";

    /// Namespace of official hub images
    pub const OFFICIAL_NAMESPACE: &str = "library";

    /// Default container image tag
    pub const DEFAULT_TAG: &str = "latest";

    /// Longest reference accepted from a request
    pub const MAX_LENGTH: usize = 255;
}

/// Multi-platform builder constants
pub mod buildx {
    /// Name of the builder instance created on demand
    pub const BUILDER_NAME: &str = "image-porter-builder";

    /// Driver used for the builder instance
    pub const BUILDER_DRIVER: &str = "docker-container";
}

/// Ticket constants
pub mod ticket {
    /// Title prefix of image-move requests
    pub const TITLE_PREFIX: &str = "[PORTER]";

    /// Label that marks open requests
    pub const REQUEST_LABEL: &str = "porter";

    pub const LABEL_SUCCESS: &str = "success";
    pub const LABEL_FAILED: &str = "failed";
    pub const LABEL_PLATFORM: &str = "platform";
}
