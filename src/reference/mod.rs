//! Image reference parsing and rule-based name rewriting
//!
//! A raw request like `nginx:latest` or `gcr.io/google-containers/pause:3.2`
//! is normalized into a fully qualified [`ImageReference`], rewritten under a
//! [`RewriteRuleSet`] and then re-homed under the target registry/namespace.
//! Nothing in this module performs I/O.

use crate::constants::reference::{DEFAULT_REGISTRY, MAX_LENGTH, OFFICIAL_NAMESPACE};
use crate::error::{PorterError, Result};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use tracing::{debug, info};


static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:/-]*[A-Za-z0-9]$").expect("name pattern is valid")
});

static DIGEST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[A-Za-z0-9=_-]+$")
        .expect("digest pattern is valid")
});

const SHELL_METACHARACTERS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '{', '}', '[', ']', '<', '>', '\\', '"', '\'', '*', '?',
    '!', '~', '#',
];

/// A fully qualified container image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    registry: String,
    namespace: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageReference {
    /// Normalize a raw reference, expanding hub short names.
    ///
    /// `nginx:alpine` becomes `docker.io/library/nginx:alpine` and
    /// `bitnami/redis` becomes `docker.io/bitnami/redis`. A first path
    /// segment containing `.` or `:` (or `localhost`) is a registry host.
    pub fn normalize(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PorterError::validation("image reference is empty"));
        }

        let (name, digest) = match raw.split_once('@') {
            Some((name, digest)) => (name, Some(digest.to_string())),
            None => (raw, None),
        };
        let (path, tag) = split_tag(name);

        let segments: Vec<&str> = path.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(PorterError::validation(format!(
                "image reference has an empty path segment: {}",
                raw
            )));
        }

        let has_host = segments.len() > 1 && is_registry_host(segments[0]);
        let (registry, rest) = if has_host {
            (segments[0].to_string(), &segments[1..])
        } else {
            (DEFAULT_REGISTRY.to_string(), &segments[..])
        };

        let repository = rest[rest.len() - 1].to_string();
        let namespace = if rest.len() == 1 && registry == DEFAULT_REGISTRY {
            OFFICIAL_NAMESPACE.to_string()
        } else {
            rest[..rest.len() - 1].join("/")
        };

        Ok(Self {
            registry,
            namespace,
            repository,
            tag: tag.map(str::to_string),
            digest,
        })
    }

    /// Registry host as written. Empty for hub-implicit target references.
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Registry host, resolving an implicit one to the public hub.
    pub fn registry_host(&self) -> &str {
        if self.registry.is_empty() {
            DEFAULT_REGISTRY
        } else {
            &self.registry
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Same reference with any `@digest` suffix removed.
    pub fn without_digest(&self) -> Self {
        Self {
            digest: None,
            ..self.clone()
        }
    }

    /// Reference without tag or digest, e.g. `docker.io/library/nginx`.
    pub fn name(&self) -> String {
        let mut name = String::new();
        if !self.registry.is_empty() {
            name.push_str(&self.registry);
            name.push('/');
        }
        if !self.namespace.is_empty() {
            name.push_str(&self.namespace);
            name.push('/');
        }
        name.push_str(&self.repository);
        name
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

fn is_registry_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

/// Split `path[:tag]`, only looking for `:` after the last `/` so that a
/// registry port is not mistaken for a tag.
fn split_tag(name: &str) -> (&str, Option<&str>) {
    let last_segment_start = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    match name[last_segment_start..].find(':') {
        Some(offset) => {
            let colon = last_segment_start + offset;
            (&name[..colon], Some(&name[colon + 1..]))
        }
        None => (name, None),
    }
}

/// Reject references that are empty, too long, contain shell metacharacters
/// or do not match the accepted name grammar. A trailing `@algorithm:hex`
/// digest is checked separately.
pub fn validate_reference(reference: &str) -> Result<()> {
    let invalid = |reason: &str| {
        PorterError::validation(format!("invalid image reference: {}", reason))
            .with_context("image", reference)
    };

    if reference.is_empty() {
        return Err(PorterError::validation("image reference is empty"));
    }
    if reference.len() > MAX_LENGTH {
        return Err(invalid(&format!("longer than {} characters", MAX_LENGTH)));
    }
    if reference
        .chars()
        .any(|c| SHELL_METACHARACTERS.contains(&c) || c.is_whitespace() || c.is_control())
    {
        return Err(invalid("contains forbidden characters"));
    }

    let (name, digest) = match reference.split_once('@') {
        Some((name, digest)) => (name, Some(digest)),
        None => (reference, None),
    };
    if let Some(digest) = digest {
        if !DIGEST_PATTERN.is_match(digest) {
            return Err(invalid("malformed digest"));
        }
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(invalid("does not match the image name grammar"));
    }
    Ok(())
}

/// One `pattern -> namespace` rewrite rule
#[derive(Debug, Clone)]
pub struct RewriteRule {
    pattern: Regex,
    namespace: String,
}

impl RewriteRule {
    /// Compile a rule. Patterns are anchored to the start of the reference.
    pub fn new(pattern: &str, namespace: impl Into<String>) -> Result<Self> {
        // Group the whole pattern so alternations stay anchored too.
        let body = pattern.strip_prefix('^').unwrap_or(pattern);
        let anchored = format!("^(?:{})", body);
        let pattern = Regex::new(&anchored).map_err(|e| {
            PorterError::config(format!("invalid rewrite rule pattern: {}", e))
                .with_context("pattern", &anchored)
        })?;
        Ok(Self {
            pattern,
            namespace: namespace.into(),
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

/// Ordered rewrite rules. The first matching rule wins.
#[derive(Debug, Clone, Default)]
pub struct RewriteRuleSet {
    rules: Vec<RewriteRule>,
}

impl RewriteRuleSet {
    pub fn new(rules: Vec<RewriteRule>) -> Self {
        Self { rules }
    }

    /// Compile `(pattern, namespace)` pairs in order.
    pub fn from_pairs<I, P, N>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, N)>,
        P: AsRef<str>,
        N: Into<String>,
    {
        let rules = pairs
            .into_iter()
            .map(|(pattern, namespace)| RewriteRule::new(pattern.as_ref(), namespace))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[RewriteRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rewrite the registry prefix of `reference`.
    ///
    /// The digest is dropped first. When no rule matches, the digest-free
    /// reference is returned unchanged.
    pub fn rewrite(&self, reference: &ImageReference) -> String {
        let name = reference.without_digest().to_string();
        for rule in &self.rules {
            if let Some(m) = rule.pattern.find(&name).filter(|m| m.start() == 0) {
                debug!(
                    "Rewrite rule {} -> {:?} matched {}",
                    rule.pattern(),
                    rule.namespace,
                    name
                );
                return format!("{}{}", rule.namespace, &name[m.end()..]);
            }
        }
        name
    }
}

/// Compose `registry/namespace/repository[:tag]` from the final path segment
/// of a rewritten name. Empty registry or namespace segments are omitted.
pub fn build_target(
    rewritten: &str,
    target_registry: &str,
    target_namespace: &str,
) -> Result<ImageReference> {
    let last = rewritten.rsplit('/').next().unwrap_or(rewritten);
    let (repository, tag) = match last.split_once(':') {
        Some((repository, tag)) => (repository, Some(tag.to_string())),
        None => (last, None),
    };

    if repository.is_empty() {
        return Err(PorterError::validation(format!(
            "cannot derive a repository name from {:?}",
            rewritten
        )));
    }

    Ok(ImageReference {
        registry: target_registry.trim_end_matches('/').to_string(),
        namespace: target_namespace.trim_matches('/').to_string(),
        repository: repository.to_string(),
        tag,
        digest: None,
    })
}

/// The source/target pair produced for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformation {
    pub source: ImageReference,
    pub rewritten: String,
    pub target: ImageReference,
}

/// Turns raw requests into validated source/target references
pub struct ImageTransformer {
    rules: RewriteRuleSet,
}

impl ImageTransformer {
    pub fn new(rules: RewriteRuleSet) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RewriteRuleSet {
        &self.rules
    }

    pub fn transform(
        &self,
        raw: &str,
        target_registry: &str,
        target_namespace: &str,
    ) -> Result<Transformation> {
        let raw = raw.trim();
        debug!("Transforming image reference: {}", raw);
        validate_reference(raw)?;

        let source = ImageReference::normalize(raw)?;
        validate_reference(&source.to_string())?;

        let rewritten = self.rules.rewrite(&source);
        if rewritten == source.without_digest().to_string() {
            return Err(PorterError::validation(format!(
                "unsupported registry: no rewrite rule matches {}",
                source.registry_host()
            ))
            .with_context("source_image", &source)
            .with_context("registry", source.registry_host()));
        }

        let target = build_target(&rewritten, target_registry, target_namespace)?;
        validate_reference(&target.to_string())
            .map_err(|e| e.with_context("source_image", &source))?;

        info!("Image name transformed: {} -> {}", source, target);
        Ok(Transformation {
            source,
            rewritten,
            target,
        })
    }
}
