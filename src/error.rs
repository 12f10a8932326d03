use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FinderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("ONNX error: {0}")]
    Onnx(#[from] ort::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Inference error: {0}")]
    Inference(String),
    #[error("Hugging Face Hub error: {0}")]
    HfHub(String),
    #[error("Model folder not found: {0}")]
    ModelFolderNotFound(PathBuf),
    #[error("Model folder {model_dir} is missing required file '{file}'")]
    MissingModelFile { model_dir: PathBuf, file: String },
    #[error("CSV must contain columns: image_path, artist, genre, title (missing: {})", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("No images loaded out of {rows} rows. Please check image_path in the metadata table.")]
    NoImagesLoaded { rows: usize },
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),
    #[error("{0}")]
    IndexUnavailable(String),
    #[error("top_k must be between 1 and {max} (got {top_k})")]
    InvalidTopK { top_k: i64, max: usize },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Invalid image path: {0}")]
    InvalidPath(String),
    #[error("Image not found: {0}")]
    NotFound(PathBuf),
}

/// Who is to blame for an error, as seen by a client of the query service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Internal,
}

impl FinderError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTopK { .. } | Self::InvalidRequest(_) => ErrorKind::Validation,
            Self::NotFound(_) | Self::InvalidPath(_) => ErrorKind::NotFound,
            _ => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, FinderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_client_errors() {
        let err = FinderError::InvalidTopK { top_k: 0, max: 10 };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.to_string(), "top_k must be between 1 and 10 (got 0)");

        let err = FinderError::NotFound(PathBuf::from("/nope.jpg"));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = FinderError::NoImagesLoaded { rows: 3 };
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn missing_columns_message_lists_every_column() {
        let err = FinderError::MissingColumns(vec!["genre".into(), "title".into()]);
        assert!(err.to_string().ends_with("(missing: genre, title)"));
    }
}
