use crate::auth::RegistryCredentials;
use crate::constants::buildx::{BUILDER_DRIVER, BUILDER_NAME};
use crate::docker::{dockerfile_for, DockerDaemon};
use crate::error::{PorterError, Result};
use crate::platform::{BuildStrategy, PlatformSet};
use crate::reference::ImageReference;
use async_trait::async_trait;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::LazyLock;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};


/// Serializes multi-platform builder creation across the process
static BUILDER_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Stage of one publish run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    Idle,
    LoggedIn,
    Built,
    Pushed,
    PostProcessed,
    Done,
    Failed,
}

impl PublishState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PublishState::Done | PublishState::Failed)
    }

    fn next(&self) -> Option<PublishState> {
        match self {
            PublishState::Idle => Some(PublishState::LoggedIn),
            PublishState::LoggedIn => Some(PublishState::Built),
            PublishState::Built => Some(PublishState::Pushed),
            PublishState::Pushed => Some(PublishState::PostProcessed),
            PublishState::PostProcessed => Some(PublishState::Done),
            PublishState::Done | PublishState::Failed => None,
        }
    }
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PublishState::Idle => "idle",
            PublishState::LoggedIn => "logged-in",
            PublishState::Built => "built",
            PublishState::Pushed => "pushed",
            PublishState::PostProcessed => "post-processed",
            PublishState::Done => "done",
            PublishState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks a publish run through its states, logging each transition.
#[derive(Debug)]
pub struct PublishTracker {
    state: PublishState,
    history: Vec<PublishState>,
}

impl Default for PublishTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishTracker {
    pub fn new() -> Self {
        Self {
            state: PublishState::Idle,
            history: vec![PublishState::Idle],
        }
    }

    pub fn state(&self) -> PublishState {
        self.state
    }

    pub fn history(&self) -> &[PublishState] {
        &self.history
    }

    /// Move to `next`, which must directly follow the current state.
    pub fn advance(&mut self, next: PublishState) -> Result<()> {
        if self.state.next() != Some(next) {
            return Err(PorterError::build(format!(
                "invalid publish transition {} -> {}",
                self.state, next
            )));
        }
        debug!("Publish state: {} -> {}", self.state, next);
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Enter `Failed` from any non-terminal state.
    pub fn fail(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        warn!("Publish state: {} -> {}", self.state, PublishState::Failed);
        self.state = PublishState::Failed;
        self.history.push(PublishState::Failed);
    }
}

/// Builds the target image from the source and pushes it
#[async_trait]
pub trait ImagePublisher: Send + Sync {
    async fn publish(
        &self,
        source: &ImageReference,
        target: &ImageReference,
        strategy: &BuildStrategy,
        tracker: &mut PublishTracker,
    ) -> Result<()>;
}

/// Publisher backed by the local Docker daemon and buildx
pub struct DockerPublisher {
    daemon: DockerDaemon,
    credentials: RegistryCredentials,
    buildkit_image: Option<String>,
}

impl DockerPublisher {
    pub fn new(credentials: RegistryCredentials, buildkit_image: Option<String>) -> Result<Self> {
        let daemon = DockerDaemon::connect()?;
        Ok(Self {
            daemon,
            credentials,
            buildkit_image,
        })
    }

    pub fn daemon(&self) -> &DockerDaemon {
        &self.daemon
    }

    /// Log the CLI in so buildx can push. Skipped without credentials.
    async fn login(&self) -> Result<()> {
        let Some((username, password)) = self.credentials.basic() else {
            debug!("No registry credentials configured, skipping login");
            return Ok(());
        };

        let registry = if self.credentials.registry.is_empty() {
            "Docker Hub"
        } else {
            self.credentials.registry.as_str()
        };
        info!("Logging in to {} as {}", registry, username);

        let args = login_args(&self.credentials.registry, username);
        let output = self
            .run_docker(&args, Some(password))
            .await
            .map_err(|e| e.with_context("stage", "login"))?;
        if !output.status.success() {
            error!(
                "docker login failed:\n{}",
                String::from_utf8_lossy(&output.stderr)
            );
            return Err(PorterError::build("docker login failed")
                .with_context("stage", "login")
                .with_context("registry", registry));
        }
        Ok(())
    }

    /// Make sure an active builder can produce multi-platform images.
    async fn ensure_builder(&self) -> Result<()> {
        let version = self.run_docker(&["buildx", "version"], None).await?;
        if !version.status.success() {
            return Err(PorterError::system(
                "docker buildx is not available",
                String::from_utf8_lossy(&version.stderr).trim().to_string(),
            ));
        }

        let _guard = BUILDER_LOCK.lock().await;

        let ls = self.run_docker(&["buildx", "ls"], None).await?;
        if ls.status.success() && has_multi_platform_builder(&String::from_utf8_lossy(&ls.stdout))
        {
            debug!("Active multi-platform builder found");
            return Ok(());
        }

        info!("Creating buildx builder {}", BUILDER_NAME);
        let args = create_builder_args(self.buildkit_image.as_deref());
        let created = self.run_docker(&args, None).await?;
        if !created.status.success() {
            let output = combined_output(&created);
            if output.contains("already exists") {
                debug!("Builder {} already exists, switching to it", BUILDER_NAME);
                let used = self.run_docker(&["buildx", "use", BUILDER_NAME], None).await?;
                if !used.status.success() {
                    return Err(PorterError::system(
                        "failed to switch to the existing buildx builder",
                        combined_output(&used),
                    ));
                }
            } else {
                error!("buildx create failed:\n{}", output);
                return Err(PorterError::system("failed to create buildx builder", output));
            }
        }

        let bootstrap = self
            .run_docker(&["buildx", "inspect", "--bootstrap"], None)
            .await?;
        if !bootstrap.status.success() {
            warn!(
                "Builder bootstrap failed, trying the build anyway:\n{}",
                combined_output(&bootstrap)
            );
        }
        Ok(())
    }

    async fn buildx_build(
        &self,
        source: &ImageReference,
        target: &ImageReference,
        platforms: &PlatformSet,
    ) -> Result<()> {
        let context_dir = tempfile::tempdir()
            .map_err(|e| PorterError::system("failed to create build directory", e))?;
        std::fs::write(context_dir.path().join("Dockerfile"), dockerfile_for(source))
            .map_err(|e| PorterError::system("failed to write Dockerfile", e))?;

        let args = buildx_build_args(target, platforms, context_dir.path());
        info!("Running buildx build for {}", platforms);
        let output = self.run_docker(&args, None).await?;

        if !output.status.success() {
            error!("buildx build failed:\n{}", combined_output(&output));
            return Err(PorterError::build("multi-platform build failed")
                .with_context("stage", "buildx")
                .with_context("command", format!("docker {}", args.join(" "))));
        }
        debug!("{}", combined_output(&output));
        Ok(())
    }

    async fn run_docker<S: AsRef<str>>(&self, args: &[S], stdin: Option<&str>) -> Result<Output> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        debug!("Running: docker {}", args.join(" "));

        let docker_bin = find_docker_cli(std::env::var_os("PATH"))?;
        let mut cmd = Command::new(docker_bin);
        cmd.args(&args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| PorterError::system("failed to run docker", e))?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| PorterError::system("failed to write to docker stdin", e))?;
        }
        child
            .wait_with_output()
            .await
            .map_err(|e| PorterError::system("failed to wait for docker", e))
    }
}

#[async_trait]
impl ImagePublisher for DockerPublisher {
    async fn publish(
        &self,
        source: &ImageReference,
        target: &ImageReference,
        strategy: &BuildStrategy,
        tracker: &mut PublishTracker,
    ) -> Result<()> {
        match strategy {
            BuildStrategy::SinglePlatform(platform) => {
                // The daemon API receives the credentials with each request.
                debug!("Single-platform publish, skipping CLI login");
                tracker.advance(PublishState::LoggedIn)?;
                self.daemon.ping().await?;
                self.daemon
                    .build_single(source, target, platform, &self.credentials)
                    .await?;
                tracker.advance(PublishState::Built)?;
                self.daemon.push(target, &self.credentials).await?;
                tracker.advance(PublishState::Pushed)?;
            }
            BuildStrategy::MultiPlatform(platforms) => {
                self.login().await?;
                tracker.advance(PublishState::LoggedIn)?;
                self.ensure_builder().await?;
                self.buildx_build(source, target, platforms).await?;
                tracker.advance(PublishState::Built)?;
                tracker.advance(PublishState::Pushed)?;
            }
        }

        info!("Published {} as {}", source, target);
        Ok(())
    }
}

/// Locate the docker CLI on `paths`. Only login and buildx need it; the
/// single-platform path talks to the daemon API directly.
pub fn find_docker_cli<P: AsRef<OsStr>>(paths: Option<P>) -> Result<PathBuf> {
    let cwd = std::env::current_dir()
        .map_err(|e| PorterError::system("failed to read the working directory", e))?;
    which::which_in("docker", paths, cwd)
        .map_err(|e| PorterError::system("docker CLI not found in PATH", e))
}

/// `docker login` arguments; the password is passed on stdin.
pub fn login_args(registry: &str, username: &str) -> Vec<String> {
    let mut args = vec!["login".to_string()];
    if !registry.is_empty() {
        args.push(registry.to_string());
    }
    args.extend(["-u".to_string(), username.to_string(), "--password-stdin".to_string()]);
    args
}

/// True when `docker buildx ls` shows an active builder whose driver can
/// produce multi-platform images.
pub fn has_multi_platform_builder(ls_output: &str) -> bool {
    ls_output.lines().any(|line| {
        line.contains('*') && (line.contains("docker-container") || line.contains("kubernetes"))
    })
}

pub fn create_builder_args(buildkit_image: Option<&str>) -> Vec<String> {
    let mut args: Vec<String> = ["buildx", "create", "--name", BUILDER_NAME, "--driver", BUILDER_DRIVER]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if let Some(image) = buildkit_image {
        args.push("--driver-opt".to_string());
        args.push(format!("image={}", image));
    }
    args.push("--use".to_string());
    args
}

pub fn buildx_build_args(
    target: &ImageReference,
    platforms: &PlatformSet,
    context_dir: &Path,
) -> Vec<String> {
    vec![
        "buildx".to_string(),
        "build".to_string(),
        "--platform".to_string(),
        platforms.joined(),
        "-t".to_string(),
        target.to_string(),
        "--progress".to_string(),
        "plain".to_string(),
        "--push".to_string(),
        context_dir.display().to_string(),
    ]
}

fn combined_output(output: &Output) -> String {
    format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}
