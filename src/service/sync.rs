//! Sync service for orchestrating one image move
//!
//! Runs name transformation, platform probing, strategy selection, publishing
//! and the post-publish hooks in order, and drives a ticket from pickup to
//! close around that pipeline.

use crate::auth::{DockerConfig, RegistryCredentials};
use crate::builder::{DockerPublisher, ImagePublisher, PublishState, PublishTracker};
use crate::config::Config;
use crate::constants::ticket::{LABEL_FAILED, LABEL_PLATFORM, LABEL_SUCCESS};
use crate::error::{PorterError, Result};
use crate::hooks::{build_chain, HookChain, HookSummary};
use crate::platform::{select, ArchitectureReport, BuildStrategy, PlatformSet};
use crate::reference::{ImageReference, ImageTransformer};
use crate::registry::RegistryClient;
use crate::report::{plain_report, ReportContext, ReportRenderer};
use crate::service::probe::{
    ArchitectureProber, LocalDaemonSource, PlatformSource, RegistrySource,
};
use crate::ticket::{parse_title, TicketQueue};
use tracing::{debug, error, info, warn};

/// Everything known about one pipeline run, successful or not
#[derive(Debug, Default)]
pub struct BuildOutcome {
    pub success: bool,
    pub source: Option<ImageReference>,
    pub target: Option<ImageReference>,
    pub report: Option<ArchitectureReport>,
    pub strategy: Option<BuildStrategy>,
    pub error: Option<PorterError>,
    pub hooks: HookSummary,
}

impl BuildOutcome {
    pub fn failed(error: PorterError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }
}

/// Pipeline for one request at a time
pub struct SyncService {
    transformer: ImageTransformer,
    prober: ArchitectureProber,
    publisher: Box<dyn ImagePublisher>,
    hooks: HookChain,
    target_registry: String,
    target_namespace: String,
    default_platforms: PlatformSet,
    /// `None` when the templates failed to load; reports fall back to one line.
    renderer: Option<ReportRenderer>,
}

impl SyncService {
    pub fn new(
        transformer: ImageTransformer,
        prober: ArchitectureProber,
        publisher: Box<dyn ImagePublisher>,
        hooks: HookChain,
        target_registry: impl Into<String>,
        target_namespace: impl Into<String>,
        default_platforms: PlatformSet,
    ) -> Self {
        Self {
            transformer,
            prober,
            publisher,
            hooks,
            target_registry: target_registry.into(),
            target_namespace: target_namespace.into(),
            default_platforms,
            renderer: ReportRenderer::new()
                .map_err(|e| error!("Report templates unavailable: {}", e))
                .ok(),
        }
    }

    pub fn with_renderer(mut self, renderer: Option<ReportRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Wire the Docker-backed pipeline from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let target = config.registries.target.clone().unwrap_or_default();
        let credentials =
            RegistryCredentials::new(&target.registry, target.username, target.password);
        let publisher = DockerPublisher::new(credentials, config.build.buildkit_image.clone())?;

        let sources: Vec<Box<dyn PlatformSource>> = vec![
            Box::new(LocalDaemonSource::new(publisher.daemon().clone())),
            Box::new(RegistrySource::new(
                RegistryClient::new(),
                DockerConfig::discover(),
            )),
        ];
        let prober = ArchitectureProber::new(sources, config.allow_probe_fallback());

        Ok(Self::new(
            ImageTransformer::new(config.rule_set()?),
            prober,
            Box::new(publisher),
            build_chain(config),
            config.target_registry(),
            config.target_namespace(),
            config.default_platforms()?,
        ))
    }

    /// Move `raw` to the target registry. Never panics or returns early;
    /// every failure ends up in the outcome.
    pub async fn sync_image(&self, raw: &str, platforms: Option<&str>) -> BuildOutcome {
        info!("Starting image sync: {}", raw);
        let mut outcome = BuildOutcome::default();

        match self.run(raw, platforms, &mut outcome).await {
            Ok(()) => {
                outcome.success = true;
                if let Some(target) = &outcome.target {
                    info!("Image sync completed: {}", target);
                }
            }
            Err(e) => {
                error!("Image sync failed: {}", e);
                if let Some(cause) = e.cause_message() {
                    debug!("Caused by: {}", cause);
                }
                outcome.error = Some(e);
            }
        }
        outcome
    }

    async fn run(
        &self,
        raw: &str,
        platforms: Option<&str>,
        outcome: &mut BuildOutcome,
    ) -> Result<()> {
        let transformation =
            self.transformer
                .transform(raw, &self.target_registry, &self.target_namespace)?;
        let source = transformation.source;
        let target = transformation.target;
        outcome.source = Some(source.clone());
        outcome.target = Some(target.clone());

        let requested = self.requested_platforms(platforms)?;
        let probe = self.prober.probe(&source).await?;
        outcome.report = Some(ArchitectureReport::new(
            requested.clone(),
            probe.platforms.clone(),
            probe.origin,
        ));

        let (report, strategy) = select(&requested, &probe.platforms, probe.origin)
            .map_err(|e| e.with_context("source_image", &source))?;
        outcome.report = Some(report);
        outcome.strategy = Some(strategy.clone());

        let mut tracker = PublishTracker::new();
        if let Err(e) = self
            .publisher
            .publish(&source, &target, &strategy, &mut tracker)
            .await
        {
            tracker.fail();
            return Err(e
                .with_context("source_image", &source)
                .with_context("target_image", &target)
                .with_context("platforms", strategy.platforms()));
        }

        outcome.hooks = self.hooks.run(&target).await;
        if outcome.hooks.has_failures() {
            warn!(
                "{} post-publish hook(s) failed for {}",
                outcome.hooks.failures.len(),
                target
            );
        }
        tracker.advance(PublishState::PostProcessed)?;
        tracker.advance(PublishState::Done)?;
        Ok(())
    }

    fn requested_platforms(&self, platforms: Option<&str>) -> Result<PlatformSet> {
        let Some(list) = platforms.map(str::trim).filter(|p| !p.is_empty()) else {
            return Ok(self.default_platforms.clone());
        };
        let requested = PlatformSet::parse_list(list)?;
        if requested.is_empty() {
            return Ok(self.default_platforms.clone());
        }
        Ok(requested)
    }

    /// Handle the newest open ticket, if any.
    ///
    /// Queue errors while picking the ticket up are returned; errors while
    /// reporting back are only logged, so the outcome stands.
    pub async fn process_next(
        &self,
        queue: &dyn TicketQueue,
        build_log_url: Option<String>,
    ) -> Result<Option<BuildOutcome>> {
        let Some(ticket) = queue.fetch_open_request().await? else {
            info!("No open image requests");
            return Ok(None);
        };
        info!("Processing ticket #{} from {}", ticket.id, ticket.requester);

        let progress = match &build_log_url {
            Some(url) => format!("Build started: [build progress]({})", url),
            None => "Build started".to_string(),
        };
        if let Err(e) = queue.post_comment(ticket.id, &progress).await {
            warn!("Failed to post progress comment: {}", e);
        }

        let request = parse_title(&ticket.title);
        let outcome = if request.image.is_empty() {
            BuildOutcome::failed(
                PorterError::validation("ticket title names no image")
                    .with_context("title", &ticket.title),
            )
        } else {
            self.sync_image(&request.image, request.platforms.as_deref())
                .await
        };

        let context = ReportContext {
            requester: Some(ticket.requester.clone()),
            build_log_url,
        };
        let report = match &self.renderer {
            Some(renderer) => renderer.render(&outcome, &context),
            None => plain_report(&outcome),
        };

        let mut labels = vec![if outcome.success {
            LABEL_SUCCESS
        } else {
            LABEL_FAILED
        }];
        if request.platforms.is_some() {
            labels.push(LABEL_PLATFORM);
        }

        if let Err(e) = queue.post_comment(ticket.id, &report).await {
            error!("Failed to post result to ticket #{}: {}", ticket.id, e);
        }
        if let Err(e) = queue.add_labels(ticket.id, &labels).await {
            error!("Failed to label ticket #{}: {}", ticket.id, e);
        }
        if let Err(e) = queue.close(ticket.id).await {
            error!("Failed to close ticket #{}: {}", ticket.id, e);
        }

        info!(
            "Ticket #{} finished: {}",
            ticket.id,
            if outcome.success { "success" } else { "failed" }
        );
        Ok(Some(outcome))
    }
}
