use crate::error::{FinderError, Result};
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Marks a path that was base64-encoded to survive as a URL segment.
pub const B64_PREFIX: &str = "b64:";

/// Maps image paths recorded at build time to files in this deployment.
#[derive(Debug, Clone)]
pub struct PathResolver {
    legacy_bases: Vec<String>,
    current_base: PathBuf,
}

impl PathResolver {
    #[must_use]
    pub fn new(current_base: impl Into<PathBuf>, legacy_bases: Vec<String>) -> Self {
        Self {
            legacy_bases,
            current_base: current_base.into(),
        }
    }

    /// Undo the `b64:` transport encoding, if present.
    pub fn decode(raw: &str) -> Result<String> {
        let Some(encoded) = raw.strip_prefix(B64_PREFIX) else {
            return Ok(raw.to_owned());
        };
        let bytes = STANDARD
            .decode(encoded)
            .or_else(|_| URL_SAFE.decode(encoded))
            .map_err(|e| FinderError::InvalidPath(format!("bad base64 ({e})")))?;
        String::from_utf8(bytes).map_err(|_| FinderError::InvalidPath("path is not UTF-8".into()))
    }

    /// The `b64:` form of `path`.
    #[must_use]
    pub fn encode(path: &str) -> String {
        format!("{B64_PREFIX}{}", STANDARD.encode(path))
    }

    /// Swap a known legacy prefix for the current base, keeping the rest.
    #[must_use]
    pub fn map(&self, path: &str) -> PathBuf {
        for base in &self.legacy_bases {
            let base = base.trim_end_matches('/');
            if let Some(rest) = path.strip_prefix(base) {
                if let Some(relative) = rest.strip_prefix('/') {
                    return self.current_base.join(relative);
                }
            }
        }
        PathBuf::from(path)
    }

    /// Decode and map `raw`, then require that the result is an existing file.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf> {
        let decoded = Self::decode(raw)?;
        let path = self.map(&decoded);
        if !is_file(&path) {
            warn!("Image not found: {}", path.display());
            return Err(FinderError::NotFound(path));
        }
        Ok(path)
    }
}

fn is_file(path: &Path) -> bool {
    path.metadata().is_ok_and(|m| m.is_file())
}
