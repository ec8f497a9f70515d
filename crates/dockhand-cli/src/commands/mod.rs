//! CLI command definitions and dispatch.

pub mod gc;
pub mod images;
pub mod inspect;
pub mod present;
pub mod pull;
pub mod rmi;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use dockhand_common::config::DockhandConfig;
use dockhand_image::registry::HttpRegistryClient;
use dockhand_image::{ImageIndex, ImageManager, ImageReference};

/// Dockhand — container image manager for a single node.
#[derive(Parser, Debug)]
#[command(name = "dockhand", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Path to a JSON configuration file.
    #[arg(long, global = true, env = "DOCKHAND_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the image catalog.
    #[arg(long, global = true, env = "DOCKHAND_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Registry host to contact over plain HTTP (repeatable).
    #[arg(long = "insecure-registry", global = true, value_name = "HOST")]
    pub insecure_registries: Vec<String>,

    /// Enable offline mode (every pull fails as unreachable).
    #[arg(long, global = true)]
    pub offline: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Log line format written to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pull an image from its registry.
    Pull(pull::PullArgs),
    /// List images present on this node.
    Images(images::ImagesArgs),
    /// Report whether an image is present.
    Present(present::PresentArgs),
    /// Remove one or more images.
    Rmi(rmi::RmiArgs),
    /// Show the stored record of an image as JSON.
    Inspect(inspect::InspectArgs),
    /// Evict the oldest images once usage passes a threshold.
    Gc(gc::GcArgs),
}

/// State shared by every command handler.
#[derive(Debug)]
pub struct Context {
    /// Effective configuration after file, environment, and flags.
    pub config: DockhandConfig,
    /// Manager over the on-disk catalog and the HTTP registry client.
    pub manager: ImageManager,
}

impl Context {
    /// Builds the manager described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be opened or the HTTP client
    /// cannot be built.
    pub fn from_config(config: DockhandConfig) -> anyhow::Result<Self> {
        let index = ImageIndex::open(&config.data_dir)
            .with_context(|| format!("opening catalog in {}", config.data_dir.display()))?;
        let registry = HttpRegistryClient::new(&config)?;
        let manager = ImageManager::new(index, Arc::new(registry));
        Ok(Self { config, manager })
    }
}

/// Merges the configuration file with command-line overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be loaded or the merged result is
/// invalid.
pub fn load_config(cli: &Cli) -> anyhow::Result<DockhandConfig> {
    let mut config = match &cli.config {
        Some(path) => DockhandConfig::load(path)?,
        None => DockhandConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir.clone_from(dir);
    }
    for host in &cli.insecure_registries {
        if !config.is_insecure(host) {
            config.insecure_registries.push(host.clone());
        }
    }
    config.offline |= cli.offline;
    config.validate()?;
    Ok(config)
}

/// Parses an image reference given on the command line.
///
/// # Errors
///
/// Returns an error if the reference is malformed.
pub fn parse_reference(raw: &str) -> anyhow::Result<ImageReference> {
    Ok(raw.parse::<ImageReference>()?)
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    tracing::debug!(data_dir = %config.data_dir.display(), offline = config.offline, "configuration loaded");
    let ctx = Context::from_config(config)?;
    match cli.command {
        Command::Pull(args) => pull::execute(&ctx, args).await,
        Command::Images(args) => images::execute(&ctx, &args),
        Command::Present(args) => present::execute(&ctx, &args),
        Command::Rmi(args) => rmi::execute(&ctx, &args),
        Command::Inspect(args) => inspect::execute(&ctx, &args),
        Command::Gc(args) => gc::execute(&ctx, &args),
    }
}
