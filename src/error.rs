//! Error types for image-porter.
//!
//! Every failure the pipeline can report carries an [`ErrorKind`], a short
//! message, an optional cause and a set of key/value context entries. The
//! context is what ends up in the requester-facing report, so values for
//! secret-looking keys are masked when rendered.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Result type alias for image-porter operations.
pub type Result<T> = std::result::Result<T, PorterError>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Category of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    /// Ticket queue failures.
    ExternalService,
    Build,
    /// Post-publish hook failures. Never abort a run.
    Registry,
    Validation,
    Probe,
    System,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "CONFIG_ERROR",
            ErrorKind::ExternalService => "EXTERNAL_SERVICE_ERROR",
            ErrorKind::Build => "BUILD_ERROR",
            ErrorKind::Registry => "REGISTRY_ERROR",
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Probe => "PROBE_ERROR",
            ErrorKind::System => "SYSTEM_ERROR",
        }
    }

    /// Short phrase used in the requester-facing summary line.
    pub fn summary(&self) -> &'static str {
        match self {
            ErrorKind::Config => "configuration problem",
            ErrorKind::ExternalService => "ticket service operation failed",
            ErrorKind::Build => "image build or push failed",
            ErrorKind::Registry => "registry follow-up failed",
            ErrorKind::Validation => "input validation failed",
            ErrorKind::Probe => "could not determine upstream platforms",
            ErrorKind::System => "build environment unavailable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for image-porter.
#[derive(Error, Debug)]
#[error("[{kind}] {message}")]
pub struct PorterError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
    context: BTreeMap<String, String>,
}

impl PorterError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    pub fn wrap(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source.into()),
            context: BTreeMap::new(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn probe(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Probe, message)
    }

    pub fn build(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Build, message)
    }

    pub fn build_caused(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::wrap(ErrorKind::Build, message, source)
    }

    pub fn registry(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::wrap(ErrorKind::Registry, message, source)
    }

    pub fn external(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::wrap(ErrorKind::ExternalService, message, source)
    }

    pub fn system(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::wrap(ErrorKind::System, message, source)
    }

    /// Attach a context entry. Later entries with the same key win.
    pub fn with_context(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// Message of the underlying cause, if any.
    pub fn cause_message(&self) -> Option<String> {
        self.source.as_ref().map(|s| s.to_string())
    }

    /// Context with secret-looking values masked, safe for public reports.
    pub fn redacted_context(&self) -> Vec<(String, String)> {
        self.context
            .iter()
            .map(|(k, v)| {
                if is_sensitive_key(k) {
                    (k.clone(), mask_sensitive(v))
                } else {
                    (k.clone(), v.clone())
                }
            })
            .collect()
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    ["password", "secret", "token", "access_key", "credential"]
        .iter()
        .any(|needle| key.contains(needle))
}

/// Mask a secret, keeping at most the first and last four characters.
pub fn mask_sensitive(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}****{}", head, tail)
}
