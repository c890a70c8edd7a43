use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "image-porter")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the configuration file
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process the newest open image request
    ///
    /// Flags override the config file, which overrides the environment.
    Sync(SyncArgs),

    /// Print the target name an image would be mirrored to
    Transform {
        /// Source image reference (e.g., gcr.io/google-containers/pause:3.2)
        image: String,

        /// Target registry host
        #[arg(long)]
        registry: Option<String>,

        /// Target namespace
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Show version information
    Version,
}

#[derive(Args, Default)]
pub struct SyncArgs {
    /// GitHub token used to read and update requests
    #[arg(short = 't', long = "github-token")]
    pub github_token: Option<String>,

    /// Owner of the request repository
    #[arg(short = 'u', long = "github-user")]
    pub github_user: Option<String>,

    /// Request repository
    #[arg(short = 'p', long = "github-repo")]
    pub github_repo: Option<String>,

    /// Workflow run id, used for build log links
    #[arg(short = 'i', long = "github-run-id")]
    pub github_run_id: Option<String>,

    /// Target registry host; empty means Docker Hub
    #[arg(short = 'r', long)]
    pub registry: Option<String>,

    /// Target namespace
    #[arg(short = 'n', long)]
    pub namespace: Option<String>,

    /// Target registry user
    #[arg(short = 'a', long = "registry-user")]
    pub registry_user: Option<String>,

    /// Target registry password
    #[arg(short = 's', long = "registry-password")]
    pub registry_password: Option<String>,
}
