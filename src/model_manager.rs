use crate::config::ModelSource;
use crate::error::FinderError;
#[cfg(feature = "hf-hub")]
use hf_hub::api::sync::Api;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Files the vision tower cannot run without.
pub const MODEL_FILES: &[&str] = &["open_clip_config.json", "visual.onnx"];

/// External weights, only present for large exports.
pub const OPTIONAL_MODEL_FILES: &[&str] = &["visual.onnx.data"];

/// Cache folder that exported models are looked up in by id.
#[must_use]
pub fn get_default_base_folder() -> PathBuf {
    env::home_dir().map_or_else(
        || Path::new(".open_clip_cache").to_owned(),
        |p| p.join(".cache/open_clip_rs"),
    )
}

/// Verify that a model directory is valid, and contains the right files.
pub fn verify_model_dir(model_dir: &Path) -> Result<(), FinderError> {
    if !model_dir.exists() {
        return Err(FinderError::ModelFolderNotFound(model_dir.to_owned()));
    }

    for file in MODEL_FILES {
        let path = model_dir.join(file);
        if !path.is_file() {
            return Err(FinderError::MissingModelFile {
                model_dir: model_dir.to_owned(),
                file: (*file).to_string(),
            });
        }
    }

    Ok(())
}

/// Find the directory holding the model described by `source`.
///
/// An explicit `model_dir` wins. Otherwise the local cache is tried, and
/// unless `local_only` is set the files are fetched from the Hugging Face Hub.
pub fn resolve_model_dir(source: &ModelSource) -> Result<PathBuf, FinderError> {
    if let Some(dir) = &source.model_dir {
        verify_model_dir(dir)?;
        return Ok(dir.clone());
    }

    let local_dir = get_default_base_folder().join(&source.model_id);
    match verify_model_dir(&local_dir) {
        Ok(()) => return Ok(local_dir),
        Err(e) if source.local_only => return Err(e),
        Err(e) => info!("Model {} not in local cache ({e})", source.model_id),
    }

    download_model(&source.model_id)
}

#[cfg(feature = "hf-hub")]
fn download_model(model_id: &str) -> Result<PathBuf, FinderError> {
    info!("Downloading {model_id} from the Hugging Face Hub ...");
    let api = Api::new().map_err(|e| FinderError::HfHub(e.to_string()))?;
    let repo = api.model(model_id.to_string());

    let mut model_dir = None;
    for file in MODEL_FILES {
        let path = repo.get(file).map_err(|e| {
            FinderError::HfHub(format!("Failed to download required file '{file}': {e}"))
        })?;
        if model_dir.is_none() {
            model_dir = path.parent().map(ToOwned::to_owned);
        }
    }
    for file in OPTIONAL_MODEL_FILES {
        if let Err(e) = repo.get(file) {
            warn!("Optional model file '{file}' not fetched: {e}");
        }
    }

    model_dir.ok_or_else(|| {
        FinderError::HfHub(format!(
            "Could not determine model directory for '{model_id}'"
        ))
    })
}

#[cfg(not(feature = "hf-hub"))]
fn download_model(model_id: &str) -> Result<PathBuf, FinderError> {
    Err(FinderError::ModelFolderNotFound(
        get_default_base_folder().join(model_id),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn verify_reports_the_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("open_clip_config.json"), "{}").unwrap();
        match verify_model_dir(dir.path()) {
            Err(FinderError::MissingModelFile { file, .. }) => assert_eq!(file, "visual.onnx"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn explicit_dir_must_exist() {
        let source = ModelSource {
            model_dir: Some(PathBuf::from("/definitely/not/here")),
            ..ModelSource::default()
        };
        assert!(matches!(
            resolve_model_dir(&source),
            Err(FinderError::ModelFolderNotFound(_))
        ));
    }

    #[test]
    fn local_only_never_downloads() {
        let source = ModelSource {
            model_id: "nobody/not-a-real-model-for-tests".into(),
            local_only: true,
            ..ModelSource::default()
        };
        assert!(matches!(
            resolve_model_dir(&source),
            Err(FinderError::ModelFolderNotFound(_))
        ));
    }
}
