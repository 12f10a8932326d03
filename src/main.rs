use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use image_finder::builder::{build_index_dir, FsImageLoader};
use image_finder::config::{BuildConfig, Device, ModelSource, ServerConfig, DEFAULT_MODEL_ID};
use image_finder::server;
use image_finder::vision::VisionEmbedder;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "image-finder", version, about = "Find catalogued artworks that look like a query image")]
struct Cli {
    /// Only log warnings and errors unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Embed every image in a metadata CSV and write a searchable index
    Build(BuildArgs),
    /// Serve similarity queries over HTTP
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Hugging Face model id of the ONNX CLIP export
    #[arg(long, default_value = DEFAULT_MODEL_ID)]
    model_id: String,
    /// Load the model from this directory instead of the cache
    #[arg(long)]
    model_dir: Option<PathBuf>,
    /// auto | cpu | cuda | coreml | directml
    #[arg(long, default_value_t = Device::Auto)]
    device: Device,
    /// Do not attempt to download weights; use local files only
    #[arg(long)]
    local_only: bool,
}

impl From<ModelArgs> for ModelSource {
    fn from(args: ModelArgs) -> Self {
        Self {
            model_id: args.model_id,
            model_dir: args.model_dir,
            device: args.device,
            local_only: args.local_only,
        }
    }
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// CSV with columns image_path, artist, genre, title
    #[arg(long)]
    meta_csv: PathBuf,
    /// Output directory for index.bin + meta.json
    #[arg(long)]
    index_dir: PathBuf,
    #[arg(long, default_value_t = 16)]
    batch: usize,
    /// Seconds between "still working" log lines
    #[arg(long, default_value_t = 20)]
    heartbeat_secs: u64,
    /// Also append log lines to this file
    #[arg(long, default_value = "logs/run.log")]
    log_file: PathBuf,
    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// JSON server configuration; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    index_dir: Option<PathBuf>,
    /// Directory holding the images in this deployment
    #[arg(long)]
    image_base: Option<PathBuf>,
    /// Path prefix recorded at build time that maps onto --image-base (repeatable)
    #[arg(long = "legacy-base")]
    legacy_bases: Vec<String>,
    #[arg(long)]
    model_id: Option<String>,
    #[arg(long)]
    model_dir: Option<PathBuf>,
    #[arg(long)]
    device: Option<Device>,
    #[arg(long)]
    local_only: bool,
}

impl ServeArgs {
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)
                .wrap_err_with(|| format!("reading server config {}", path.display()))?,
            None => ServerConfig::default(),
        };
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = self.index_dir {
            config.index_dir = dir;
        }
        if let Some(dir) = self.image_base {
            config.image_base = dir;
        }
        if !self.legacy_bases.is_empty() {
            config.legacy_base_paths = self.legacy_bases;
        }
        if let Some(model_id) = self.model_id {
            config.model.model_id = model_id;
        }
        if let Some(dir) = self.model_dir {
            config.model.model_dir = Some(dir);
        }
        if let Some(device) = self.device {
            config.model.device = device;
        }
        config.model.local_only |= self.local_only;
        Ok(config)
    }
}

fn init_logging(quiet: bool, log_file: Option<&Path>) -> Result<()> {
    let default_level = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(fmt::layer().with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .wrap_err("installing tracing subscriber")?;
    Ok(())
}

fn run_build(args: BuildArgs) -> Result<()> {
    let source = ModelSource::from(args.model);
    let start = Instant::now();
    let mut embedder = VisionEmbedder::from_source(&source).wrap_err(
        "Failed to load model. If this is stuck on downloading, try --local-only with a pre-downloaded model.",
    )?;
    info!("Model loaded in {:.1?}", start.elapsed());

    let config = BuildConfig {
        batch_size: args.batch,
        heartbeat_interval: Duration::from_secs(args.heartbeat_secs),
    };
    let report = build_index_dir(
        &args.meta_csv,
        &args.index_dir,
        config,
        &FsImageLoader,
        &mut embedder,
    )?;
    info!(
        "Indexed {} images ({} skipped) in {:.1?}",
        report.indexed,
        report.skipped,
        start.elapsed()
    );
    Ok(())
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    match cli.command {
        Command::Build(args) => {
            init_logging(cli.quiet, Some(&args.log_file))?;
            run_build(args)
        }
        Command::Serve(args) => {
            init_logging(cli.quiet, None)?;
            let config = args.into_config()?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(server::serve(config))?;
            Ok(())
        }
    }
}
