//! Markdown outcome report posted back to the requester

use crate::constants::platform::FALLBACK;
use crate::error::{PorterError, Result};
use crate::platform::{ArchitectureReport, BuildStrategy, PlatformSet};
use crate::service::sync::BuildOutcome;
use handlebars::Handlebars;
use serde::Serialize;
use tracing::error;

const SUCCESS_TEMPLATE: &str = r#"**✅ Mirror complete**

```bash
# source image
{{source}}

# mirrored image
{{target}}

# pull and restore the original name
docker pull {{target}}{{#if pull_platform}} --platform {{pull_platform}}{{/if}}

docker tag {{target}} {{source}}

docker images | grep $(echo {{source}} | awk -F':' '{print $1}')
```
{{#if architecture}}

{{> architecture}}
{{/if}}
{{#if hook_failures}}

⚠️ **Follow-up actions failed** (the image itself was published):
{{#each hook_failures}}
- `{{this}}`
{{/each}}
{{/if}}
{{#if build_log_url}}

---
📋 **Build details**: [build log]({{build_log_url}})
{{/if}}
"#;

const FAILURE_TEMPLATE: &str = r#"**❌ Mirror failed**

**Reason**: {{#if requester}}@{{requester}} {{/if}}{{summary}}: {{message}}

**Details**:
```
type: {{kind}}
message: {{message}}
{{#if cause}}cause: {{cause}}
{{/if}}{{#if context}}context:
{{#each context}}  {{this.key}}: {{this.value}}
{{/each}}{{/if}}```
{{#if architecture}}

{{> architecture}}
{{/if}}

---
🔍 **Troubleshooting**:
1. Check that the image name and tag are correct
2. Check that the upstream image exists and is public
3. Check that the requested platforms are published upstream
{{#if build_log_url}}

📋 **Build details**: [build log]({{build_log_url}})
{{/if}}
"#;

const ARCHITECTURE_PARTIAL: &str = r#"🏗️ **Architecture**:
```
upstream:  {{architecture.upstream}}
requested: {{architecture.requested}}
built:     {{architecture.resolved}}
```
{{#if architecture.multi_platform_upstream}}ℹ️ Upstream is multi-platform; the mirror keeps every built platform.{{else}}ℹ️ Upstream is single-platform; so is the mirror.{{/if}}
{{#if architecture.skipped}}⚠️ **Skipped**: `{{architecture.skipped}}` (not published upstream)
{{/if}}{{#if architecture.fallback}}⚠️ **Unverified**: upstream platforms could not be probed, `{{architecture.fallback}}` was assumed.
{{/if}}"#;

/// Request details the report needs besides the outcome
#[derive(Debug, Clone, Default)]
pub struct ReportContext {
    pub requester: Option<String>,
    pub build_log_url: Option<String>,
}

#[derive(Serialize)]
struct ArchitectureView {
    upstream: String,
    requested: String,
    resolved: String,
    skipped: String,
    multi_platform_upstream: bool,
    fallback: Option<&'static str>,
}

impl From<&ArchitectureReport> for ArchitectureView {
    fn from(report: &ArchitectureReport) -> Self {
        Self {
            upstream: list(&report.upstream),
            requested: list(&report.requested),
            resolved: list(&report.resolved),
            skipped: list(&report.skipped),
            multi_platform_upstream: report.is_multi_platform_upstream(),
            fallback: report.origin.is_fallback().then_some(FALLBACK),
        }
    }
}

#[derive(Serialize)]
struct SuccessView {
    source: String,
    target: String,
    pull_platform: Option<String>,
    architecture: Option<ArchitectureView>,
    hook_failures: Vec<String>,
    build_log_url: Option<String>,
}

#[derive(Serialize)]
struct ContextEntry {
    key: String,
    value: String,
}

#[derive(Serialize)]
struct FailureView {
    requester: Option<String>,
    summary: &'static str,
    kind: &'static str,
    message: String,
    cause: Option<String>,
    context: Vec<ContextEntry>,
    architecture: Option<ArchitectureView>,
    build_log_url: Option<String>,
}

fn list(platforms: &PlatformSet) -> String {
    platforms
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Renders outcome reports from the built-in templates
pub struct ReportRenderer {
    handlebars: Handlebars<'static>,
}

impl ReportRenderer {
    pub fn new() -> Result<Self> {
        Self::from_templates(SUCCESS_TEMPLATE, FAILURE_TEMPLATE, ARCHITECTURE_PARTIAL)
    }

    fn from_templates(success: &str, failure: &str, architecture: &str) -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.set_strict_mode(false);

        for (name, template) in [
            ("success", success),
            ("failure", failure),
            ("architecture", architecture),
        ] {
            handlebars
                .register_template_string(name, template)
                .map_err(|e| PorterError::config(format!("invalid report template {}: {}", name, e)))?;
        }
        Ok(Self { handlebars })
    }

    pub fn render(&self, outcome: &BuildOutcome, context: &ReportContext) -> String {
        let rendered = match &outcome.error {
            None => self.handlebars.render("success", &success_view(outcome, context)),
            Some(err) => self
                .handlebars
                .render("failure", &failure_view(err, outcome, context)),
        };
        rendered.unwrap_or_else(|e| {
            error!("Failed to render report: {}", e);
            plain_report(outcome)
        })
    }
}

fn success_view(outcome: &BuildOutcome, context: &ReportContext) -> SuccessView {
    let pull_platform = match &outcome.strategy {
        Some(BuildStrategy::SinglePlatform(platform)) => Some(platform.to_string()),
        _ => None,
    };
    SuccessView {
        source: outcome
            .source
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default(),
        target: outcome
            .target
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default(),
        pull_platform,
        architecture: outcome.report.as_ref().map(ArchitectureView::from),
        hook_failures: outcome
            .hooks
            .failures
            .iter()
            .map(|(name, err)| format!("{}: {}", name, err.message()))
            .collect(),
        build_log_url: context.build_log_url.clone(),
    }
}

fn failure_view(err: &PorterError, outcome: &BuildOutcome, context: &ReportContext) -> FailureView {
    FailureView {
        requester: context.requester.clone().filter(|r| !r.is_empty()),
        summary: err.kind().summary(),
        kind: err.kind().as_str(),
        message: err.message().to_string(),
        cause: err.cause_message(),
        context: err
            .redacted_context()
            .into_iter()
            .map(|(key, value)| ContextEntry { key, value })
            .collect(),
        architecture: outcome.report.as_ref().map(ArchitectureView::from),
        build_log_url: context.build_log_url.clone(),
    }
}

/// One-line report used when the templates are unavailable.
pub fn plain_report(outcome: &BuildOutcome) -> String {
    match &outcome.error {
        None => format!(
            "Mirror complete: {}",
            outcome
                .target
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default()
        ),
        Some(err) => format!("Mirror failed: {}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookSummary;
    use crate::platform::{select, Platform, ProbeOrigin};
    use crate::reference::ImageReference;

    fn set(list: &str) -> PlatformSet {
        PlatformSet::parse_list(list).unwrap()
    }

    fn success(origin: ProbeOrigin) -> BuildOutcome {
        let (report, strategy) =
            select(&set("linux/amd64,linux/arm64"), &set("linux/amd64"), origin).unwrap();
        BuildOutcome {
            success: true,
            source: Some(ImageReference::normalize("gcr.io/google-containers/pause:3.2").unwrap()),
            target: Some(
                ImageReference::normalize("registry.example.com/test/pause:3.2").unwrap(),
            ),
            report: Some(report),
            strategy: Some(strategy),
            error: None,
            hooks: HookSummary::default(),
        }
    }

    #[test]
    fn test_success_report() {
        let renderer = ReportRenderer::new().unwrap();
        let text = renderer.render(
            &success(ProbeOrigin::Registry),
            &ReportContext {
                requester: Some("octo".to_string()),
                build_log_url: Some("https://github.com/octo/mirror/actions/runs/42".to_string()),
            },
        );

        assert!(text.contains("```bash"));
        assert!(text.contains(
            "docker pull registry.example.com/test/pause:3.2 --platform linux/amd64"
        ));
        assert!(text.contains(
            "docker tag registry.example.com/test/pause:3.2 gcr.io/google-containers/pause:3.2"
        ));
        assert!(text.contains("awk -F':' '{print $1}'"));
        assert!(text.contains("upstream:  linux/amd64"));
        assert!(text.contains("requested: linux/amd64, linux/arm64"));
        assert!(text.contains("**Skipped**: `linux/arm64`"));
        assert!(!text.contains("Unverified"));
        assert!(text.contains("(https://github.com/octo/mirror/actions/runs/42)"));
    }

    #[test]
    fn test_success_report_flags_fallback() {
        let renderer = ReportRenderer::new().unwrap();
        let text = renderer.render(&success(ProbeOrigin::Fallback), &ReportContext::default());
        assert!(text.contains("**Unverified**"));
        assert!(!text.contains("Build details"));
    }

    #[test]
    fn test_multi_platform_report_has_no_pull_platform() {
        let both = set("linux/amd64,linux/arm64");
        let (report, strategy) = select(&both, &both, ProbeOrigin::Registry).unwrap();
        let outcome = BuildOutcome {
            report: Some(report),
            strategy: Some(strategy),
            ..success(ProbeOrigin::Registry)
        };
        let text = ReportRenderer::new()
            .unwrap()
            .render(&outcome, &ReportContext::default());
        assert!(text.contains("docker pull registry.example.com/test/pause:3.2\n"));
        assert!(text.contains("multi-platform"));
    }

    #[test]
    fn test_failure_report_redacts_context() {
        let err = PorterError::build("image push failed: unauthorized")
            .with_context("target_image", "registry.example.com/test/pause:3.2")
            .with_context("password", "hunter2hunter2");
        let outcome = BuildOutcome {
            success: false,
            error: Some(err),
            strategy: Some(BuildStrategy::SinglePlatform(
                Platform::parse("linux/amd64").unwrap(),
            )),
            ..success(ProbeOrigin::Registry)
        };

        let text = ReportRenderer::new().unwrap().render(
            &outcome,
            &ReportContext {
                requester: Some("octo".to_string()),
                build_log_url: None,
            },
        );

        assert!(text.contains("@octo image build or push failed: image push failed: unauthorized"));
        assert!(text.contains("type: BUILD_ERROR"));
        assert!(text.contains("  target_image: registry.example.com/test/pause:3.2"));
        assert!(text.contains("  password: hunt****ter2"));
        assert!(!text.contains("hunter2hunter2"));
        assert!(text.contains("Troubleshooting"));
    }

    #[test]
    fn test_broken_template_is_config_error() {
        let err = ReportRenderer::from_templates("{{#if}}", FAILURE_TEMPLATE, ARCHITECTURE_PARTIAL)
            .err()
            .unwrap();
        assert!(err.message().contains("invalid report template success"));
    }

    #[test]
    fn test_plain_report() {
        assert_eq!(
            plain_report(&success(ProbeOrigin::Registry)),
            "Mirror complete: registry.example.com/test/pause:3.2"
        );
        let failed = BuildOutcome::failed(PorterError::validation("unsupported registry"));
        assert_eq!(
            plain_report(&failed),
            "Mirror failed: [VALIDATION_ERROR] unsupported registry"
        );
    }

    #[test]
    fn test_failure_without_architecture() {
        let outcome = BuildOutcome::failed(PorterError::validation("unsupported registry"));
        let text = ReportRenderer::new()
            .unwrap()
            .render(&outcome, &ReportContext::default());
        assert!(text.contains("type: VALIDATION_ERROR"));
        assert!(!text.contains("Architecture"));
    }
}
