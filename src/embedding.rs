use crate::error::{FinderError, Result};
use image::DynamicImage;
use ndarray::{Array1, Array2};

/// Norm drift tolerated before a stored vector counts as not unit-length.
pub const UNIT_NORM_TOLERANCE: f32 = 1e-3;

/// Anything that turns decoded images into unit-length vectors of a fixed dimension.
pub trait EmbeddingProvider {
    /// Length of every vector this provider returns.
    fn dim(&self) -> usize;

    /// Embed a batch of images. Row `i` of the result belongs to `images[i]`
    /// and is L2-normalized.
    fn embed_batch(&mut self, images: &[DynamicImage]) -> Result<Array2<f32>>;

    /// Embed a single image
    fn embed_one(&mut self, image: &DynamicImage) -> Result<Array1<f32>> {
        let embs = self.embed_batch(std::slice::from_ref(image))?;
        let len = embs.len();
        embs.into_shape_with_order(len)
            .map_err(|e| FinderError::Inference(e.to_string()))
    }
}

impl<E: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<E> {
    fn dim(&self) -> usize {
        (**self).dim()
    }

    fn embed_batch(&mut self, images: &[DynamicImage]) -> Result<Array2<f32>> {
        (**self).embed_batch(images)
    }
}

#[must_use]
pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale `vector` to unit length in place.
pub fn l2_normalize(vector: &mut [f32]) -> Result<()> {
    let norm = l2_norm(vector);
    if !norm.is_finite() || norm <= f32::EPSILON {
        return Err(FinderError::Inference(format!(
            "cannot normalize embedding with norm {norm}"
        )));
    }
    vector.iter_mut().for_each(|x| *x /= norm);
    Ok(())
}

/// Normalize each row of a batch of embeddings.
pub fn l2_normalize_rows(embeddings: &mut Array2<f32>) -> Result<()> {
    for mut row in embeddings.rows_mut() {
        let slice = row
            .as_slice_mut()
            .ok_or_else(|| FinderError::Inference("Layout mismatch".into()))?;
        l2_normalize(slice)?;
    }
    Ok(())
}

#[must_use]
pub fn is_unit_norm(vector: &[f32]) -> bool {
    (l2_norm(vector) - 1.0).abs() <= UNIT_NORM_TOLERANCE
}

#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
