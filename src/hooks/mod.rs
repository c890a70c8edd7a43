//! Follow-up actions run after a successful push
//!
//! Hooks are registered once from configuration. Each run filters them by
//! the target registry host and by whether they have what they need; a hook
//! failure is logged and recorded but never fails the pipeline.

use crate::config::Config;
use crate::error::PorterError;
use crate::reference::ImageReference;
use async_trait::async_trait;
use tracing::{debug, info, warn};

pub mod swr;

pub use swr::{SwrCredentials, SwrVisibilityHook};

/// One registry-specific follow-up action
#[async_trait]
pub trait PostPublishHook: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this hook applies to images pushed to `host`.
    fn matches(&self, host: &str) -> bool;

    fn is_configured(&self) -> bool;

    async fn apply(&self, target: &ImageReference) -> crate::error::Result<()>;
}

/// What happened to each hook during one run
#[derive(Debug, Default)]
pub struct HookSummary {
    pub applied: Vec<String>,
    /// Matching hooks that lacked configuration
    pub skipped: Vec<String>,
    pub failures: Vec<(String, PorterError)>,
}

impl HookSummary {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Ordered hook list; registration order is execution order
#[derive(Default)]
pub struct HookChain {
    hooks: Vec<Box<dyn PostPublishHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Box<dyn PostPublishHook>) {
        debug!("Registered post-publish hook: {}", hook.name());
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub async fn run(&self, target: &ImageReference) -> HookSummary {
        let host = target.registry_host();
        let mut summary = HookSummary::default();

        for hook in &self.hooks {
            if !hook.matches(host) {
                debug!("Hook {} does not apply to {}", hook.name(), host);
                continue;
            }
            if !hook.is_configured() {
                info!("Hook {} is not configured, skipping", hook.name());
                summary.skipped.push(hook.name().to_string());
                continue;
            }

            info!("Applying hook: {}", hook.name());
            match hook.apply(target).await {
                Ok(()) => {
                    info!("Hook {} completed", hook.name());
                    summary.applied.push(hook.name().to_string());
                }
                Err(e) => {
                    warn!("Hook {} failed: {}", hook.name(), e);
                    summary.failures.push((hook.name().to_string(), e));
                }
            }
        }

        if summary.applied.is_empty() && summary.failures.is_empty() {
            debug!("No post-publish hook applied to {}", target);
        }
        summary
    }
}

/// Hooks available for this configuration.
pub fn build_chain(config: &Config) -> HookChain {
    let mut chain = HookChain::new();
    chain.register(Box::new(SwrVisibilityHook::new(SwrCredentials::from_config(
        config,
    ))));
    info!("Post-publish hook chain has {} hook(s)", chain.len());
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct RecordingHook {
        name: &'static str,
        host: &'static str,
        configured: bool,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PostPublishHook for RecordingHook {
        fn name(&self) -> &str {
            self.name
        }

        fn matches(&self, host: &str) -> bool {
            host.contains(self.host)
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn apply(&self, _target: &ImageReference) -> crate::error::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PorterError::registry("api call failed", "HTTP 500"));
            }
            Ok(())
        }
    }

    fn hook(
        name: &'static str,
        configured: bool,
        fail: bool,
        calls: &Arc<AtomicUsize>,
    ) -> Box<dyn PostPublishHook> {
        Box::new(RecordingHook {
            name,
            host: "example.com",
            configured,
            fail,
            calls: Arc::clone(calls),
        })
    }

    #[tokio::test]
    async fn test_failing_hook_does_not_stop_others() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut chain = HookChain::new();
        chain.register(hook("first", true, true, &calls));
        chain.register(hook("second", true, false, &calls));

        let target = ImageReference::normalize("registry.example.com/test/pause:3.2").unwrap();
        let summary = chain.run(&target).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(summary.applied, vec!["second"]);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].1.kind(), ErrorKind::Registry);
    }

    #[tokio::test]
    async fn test_unconfigured_and_unmatched_hooks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut chain = HookChain::new();
        chain.register(hook("unconfigured", false, false, &calls));

        let target = ImageReference::normalize("registry.example.com/test/pause:3.2").unwrap();
        let summary = chain.run(&target).await;
        assert_eq!(summary.skipped, vec!["unconfigured"]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let other = ImageReference::normalize("ghcr.io/test/pause:3.2").unwrap();
        let summary = chain.run(&other).await;
        assert!(summary.skipped.is_empty());
        assert!(summary.applied.is_empty());
    }

    #[tokio::test]
    async fn test_swr_host_without_credentials_is_skipped() {
        let chain = build_chain(&Config::default());
        let target =
            ImageReference::normalize("swr.cn-southwest-2.myhuaweicloud.com/test/pause:3.2")
                .unwrap();
        let summary = chain.run(&target).await;
        assert_eq!(summary.skipped.len(), 1);
        assert!(!summary.has_failures());
    }
}
