use crate::error::{FinderError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default model: the `OpenAI` ViT-B/32 CLIP weights exported to ONNX.
pub const DEFAULT_MODEL_ID: &str = "timm/vit_base_patch32_clip_224.openai";

// -----------------------------------------------------------------------------
// open_clip_config.json
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct OpenClipConfig {
    pub model_cfg: ModelCfg,
    pub preprocess_cfg: PreprocessCfg,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelCfg {
    pub embed_dim: usize,
    pub vision_cfg: VisionCfg,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisionCfg {
    pub image_size: ImageSize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreprocessCfg {
    pub mean: [f32; 3],
    pub std: [f32; 3],
    #[serde(default = "default_interpolation")]
    pub interpolation: String,
    #[serde(default = "default_resize_mode")]
    pub resize_mode: String,
}

fn default_interpolation() -> String {
    "bicubic".to_owned()
}

fn default_resize_mode() -> String {
    "shortest".to_owned()
}

/// `image_size` is written either as a single edge or as `[height, width]`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(from = "ImageSizeRaw")]
pub struct ImageSize(pub u32);

#[derive(Deserialize)]
#[serde(untagged)]
enum ImageSizeRaw {
    Square(u32),
    Rect([u32; 2]),
}

impl From<ImageSizeRaw> for ImageSize {
    fn from(raw: ImageSizeRaw) -> Self {
        match raw {
            ImageSizeRaw::Square(s) => Self(s),
            ImageSizeRaw::Rect([h, w]) => Self(h.max(w)),
        }
    }
}

impl OpenClipConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

// -----------------------------------------------------------------------------
// Device selection
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Try accelerated providers first, fall back to CPU.
    #[default]
    Auto,
    Cpu,
    Cuda,
    CoreMl,
    DirectMl,
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "coreml" | "mps" => Ok(Self::CoreMl),
            "directml" | "dml" => Ok(Self::DirectMl),
            other => Err(format!(
                "unknown device '{other}', expected one of: auto, cpu, cuda, coreml, directml"
            )),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
            Self::CoreMl => "coreml",
            Self::DirectMl => "directml",
        };
        f.write_str(name)
    }
}

// -----------------------------------------------------------------------------
// Model source
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSource {
    pub model_id: String,
    /// Use this directory directly instead of the cache lookup for `model_id`.
    pub model_dir: Option<PathBuf>,
    pub device: Device,
    /// Never reach out to the Hugging Face Hub.
    pub local_only: bool,
}

impl Default for ModelSource {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_owned(),
            model_dir: None,
            device: Device::Auto,
            local_only: false,
        }
    }
}

// -----------------------------------------------------------------------------
// Index build
// -----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub batch_size: usize,
    pub heartbeat_interval: Duration,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            heartbeat_interval: Duration::from_secs(20),
        }
    }
}

impl BuildConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(FinderError::Config("batch size must be at least 1".into()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(FinderError::Config(
                "heartbeat interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Query
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// A top hit scoring at least this much is treated as the query image itself.
    pub perfect_match_threshold: f32,
    /// Fetch one extra neighbour once `top_k` reaches this value.
    pub overfetch_min_top_k: usize,
    pub max_top_k: usize,
    pub default_top_k: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            perfect_match_threshold: 0.99,
            overfetch_min_top_k: 3,
            max_top_k: 10,
            default_top_k: 3,
        }
    }
}

impl QueryConfig {
    /// Accepts `1..=max_top_k`, anything else is a client error.
    pub fn check_top_k(&self, top_k: i64) -> Result<usize> {
        match usize::try_from(top_k) {
            Ok(k) if (1..=self.max_top_k).contains(&k) => Ok(k),
            _ => Err(FinderError::InvalidTopK {
                top_k,
                max: self.max_top_k,
            }),
        }
    }
}

// -----------------------------------------------------------------------------
// Server
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub index_dir: PathBuf,
    pub model: ModelSource,
    pub query: QueryConfig,
    /// Absolute prefixes recorded at build time on another machine.
    pub legacy_base_paths: Vec<String>,
    /// Where images under a legacy prefix live in this deployment.
    pub image_base: PathBuf,
    pub allowed_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8000,
            index_dir: PathBuf::from("subset_index"),
            model: ModelSource::default(),
            query: QueryConfig::default(),
            legacy_base_paths: Vec::new(),
            image_base: PathBuf::from("subset_images"),
            allowed_origins: [
                "http://localhost:3000",
                "http://localhost:3001",
                "http://127.0.0.1:3000",
                "http://127.0.0.1:3001",
            ]
            .map(str::to_owned)
            .to_vec(),
            max_upload_bytes: 32 << 20,
        }
    }
}

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
