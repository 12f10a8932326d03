#![allow(clippy::missing_errors_doc)]
pub mod builder;
pub mod config;
pub mod embedding;
pub mod error;
pub mod heartbeat;
pub mod metadata;
pub mod model_manager;
pub mod onnx;
pub mod paths;
pub mod query;
pub mod server;
pub mod store;
pub mod title;
pub mod utils;
pub mod vision;

pub use builder::{build_index_dir, BuildReport, FsImageLoader, ImageLoader, IndexBuilder};
pub use embedding::EmbeddingProvider;
pub use error::{ErrorKind, FinderError, Result};
pub use metadata::MetadataRecord;
pub use paths::PathResolver;
pub use query::{QueryEngine, SimilarityResponse};
pub use store::{IndexStore, IndexedImage};
pub use title::parse_title;
pub use vision::VisionEmbedder;
