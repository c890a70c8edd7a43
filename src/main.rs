use anyhow::{Context, Result};
use clap::Parser;
use image_porter::{
    cli::{Cli, Commands, SyncArgs},
    config::{Config, TargetRegistryConfig},
    reference::ImageTransformer,
    service::SyncService,
    ticket::GitHubQueue,
};
use std::path::Path;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("image-porter {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Transform {
            image,
            registry,
            namespace,
        } => {
            let mut config = load_config(cli.config.as_deref(), cli.log_level, cli.debug)?;
            let target = target_section(&mut config);
            if let Some(registry) = registry {
                target.registry = registry;
            }
            if let Some(namespace) = namespace {
                target.namespace = namespace;
            }

            let transformer = ImageTransformer::new(config.rule_set()?);
            let transformation = transformer.transform(
                &image,
                config.target_registry(),
                config.target_namespace(),
            )?;
            println!("{} -> {}", transformation.source, transformation.target);
        }
        Commands::Sync(args) => {
            let mut config = load_config(cli.config.as_deref(), cli.log_level, cli.debug)?;
            apply_sync_args(&mut config, args);
            config.validate().context("Invalid configuration")?;
            debug!("Effective configuration: {:?}", config.redacted());

            let queue = GitHubQueue::from_config(&config.github)?;
            let service =
                SyncService::from_config(&config).context("Failed to set up the build pipeline")?;

            match service.process_next(&queue, config.build_log_url()).await? {
                Some(outcome) if !outcome.success => {
                    error!("Image sync failed, see the ticket for details");
                    std::process::exit(1);
                }
                Some(_) => info!("Image sync completed successfully"),
                None => {}
            }
        }
    }

    Ok(())
}

/// Load the config file and environment, then start logging at the level
/// they and the command line settle on.
fn load_config(path: Option<&Path>, log_level: Option<String>, debug: bool) -> Result<Config> {
    let mut config = Config::load(path).context("Failed to load configuration")?;
    if log_level.is_some() {
        config.app.log_level = log_level;
    }
    if debug {
        config.app.debug = Some(true);
    }

    // Initialize logging to stderr
    let filter = EnvFilter::try_new(config.log_level()).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting image-porter v{}", env!("CARGO_PKG_VERSION"));
    Ok(config)
}

fn target_section(config: &mut Config) -> &mut TargetRegistryConfig {
    config
        .registries
        .target
        .get_or_insert_with(TargetRegistryConfig::default)
}

fn apply_sync_args(config: &mut Config, args: SyncArgs) {
    let github = &mut config.github;
    github.token = args.github_token.or(github.token.take());
    github.user = args.github_user.or(github.user.take());
    github.repo = args.github_repo.or(github.repo.take());
    github.run_id = args.github_run_id.or(github.run_id.take());

    let target = target_section(config);
    if let Some(registry) = args.registry {
        target.registry = registry;
    }
    if let Some(namespace) = args.namespace {
        target.namespace = namespace;
    }
    target.username = args.registry_user.or(target.username.take());
    target.password = args.registry_password.or(target.password.take());
}
