use crate::config::{Device, ModelSource, OpenClipConfig, PreprocessCfg};
use crate::embedding::{l2_normalize_rows, EmbeddingProvider};
use crate::error::{FinderError, Result};
use crate::model_manager::{resolve_model_dir, verify_model_dir};
use crate::onnx::OnnxSession;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::{Array2, Array4, ArrayView, ArrayViewMut3, Axis, IxDyn};
use ort::value::Value;
use rayon::prelude::*;
use std::path::Path;
use tracing::info;

pub struct VisionEmbedder {
    pub session: OnnxSession,
    pub config: OpenClipConfig,
    pub input_name: String,
}

impl VisionEmbedder {
    /// Load the visual tower from a model directory.
    pub fn new(model_dir: &Path, device: Device) -> Result<Self> {
        verify_model_dir(model_dir)?;
        let session = OnnxSession::new(model_dir.join("visual.onnx"), device)?;
        let config = OpenClipConfig::from_file(model_dir.join("open_clip_config.json"))?;

        let input_name = session
            .find_input(&["pixel_values", "input", "image"])
            .ok_or_else(|| FinderError::Config("Could not find vision input node".to_string()))?;

        Ok(Self {
            session,
            config,
            input_name,
        })
    }

    /// Resolve (and if allowed, download) the model, then load it.
    pub fn from_source(source: &ModelSource) -> Result<Self> {
        let model_dir = resolve_model_dir(source)?;
        info!(
            "Loading model {} from {} (local_only={})",
            source.model_id,
            model_dir.display(),
            source.local_only
        );
        Self::new(&model_dir, source.device)
    }

    /// Embed a batch of images. Rows come back unit-normalized.
    pub fn embed_images(&mut self, images: &[DynamicImage]) -> Result<Array2<f32>> {
        let batch_tensor = self.preprocess_batch(images)?;

        let input_tensor = Value::from_array(batch_tensor)?;
        let outputs = self
            .session
            .session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])?;

        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let shape_usize: Vec<usize> = shape.iter().map(|&x| x as usize).collect();
        let view = ArrayView::from_shape(IxDyn(&shape_usize), data)
            .map_err(|e| FinderError::Inference(e.to_string()))?;

        let mut embeddings = view
            .into_dimensionality::<ndarray::Ix2>()
            .map_err(|e| FinderError::Inference(e.to_string()))?
            .to_owned();
        if embeddings.nrows() != images.len() {
            return Err(FinderError::Inference(format!(
                "model returned {} embeddings for {} images",
                embeddings.nrows(),
                images.len()
            )));
        }
        l2_normalize_rows(&mut embeddings)?;
        Ok(embeddings)
    }

    /// Resize, crop and normalize `images` into one `[N, 3, S, S]` tensor.
    pub fn preprocess_batch(&self, images: &[DynamicImage]) -> Result<Array4<f32>> {
        if images.is_empty() {
            return Err(FinderError::Inference("Empty batch".to_string()));
        }

        let size = self.config.model_cfg.vision_cfg.image_size.0;
        let filter = filter_for(&self.config.preprocess_cfg.interpolation);
        let squash = self.config.preprocess_cfg.resize_mode == "squash";
        let side = size as usize;

        let mut batch = Array4::<f32>::zeros((images.len(), 3, side, side));
        batch
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(images.par_iter())
            .for_each(|(mut slot, img)| {
                let rgb = fit_square(img, size, filter, squash);
                self.write_normalized(&rgb, &mut slot);
            });

        Ok(batch)
    }

    fn write_normalized(&self, rgb: &RgbImage, out: &mut ArrayViewMut3<f32>) {
        let PreprocessCfg { mean, std, .. } = &self.config.preprocess_cfg;
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for (c, &value) in pixel.0.iter().enumerate() {
                let scaled = f32::from(value) / 255.0;
                out[[c, y as usize, x as usize]] = (scaled - mean[c]) / std[c];
            }
        }
    }
}

fn filter_for(interpolation: &str) -> FilterType {
    match interpolation {
        "bicubic" => FilterType::CatmullRom,
        "bilinear" => FilterType::Triangle,
        _ => FilterType::Nearest,
    }
}

/// Scale `image` to a `size`x`size` RGB square. Either stretch it (`squash`)
/// or scale the short edge to `size` and center-crop the long one.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn fit_square(image: &DynamicImage, size: u32, filter: FilterType, squash: bool) -> RgbImage {
    if squash {
        return image.resize_exact(size, size, filter).to_rgb8();
    }
    let (width, height) = image.dimensions();
    let scale = size as f32 / width.min(height).max(1) as f32;
    // rounding can undershoot by a pixel, never crop below the target edge
    let w = ((width as f32 * scale).round() as u32).max(size);
    let h = ((height as f32 * scale).round() as u32).max(size);
    image
        .resize_exact(w, h, filter)
        .crop_imm((w - size) / 2, (h - size) / 2, size, size)
        .to_rgb8()
}

impl EmbeddingProvider for VisionEmbedder {
    fn dim(&self) -> usize {
        self.config.model_cfg.embed_dim
    }

    fn embed_batch(&mut self, images: &[DynamicImage]) -> Result<Array2<f32>> {
        self.embed_images(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn short_edge_is_scaled_and_long_edge_cropped() {
        let wide = DynamicImage::ImageRgb8(RgbImage::from_fn(300, 100, |x, _| {
            if x < 150 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) }
        }));
        let out = fit_square(&wide, 32, FilterType::Nearest, false);
        assert_eq!(out.dimensions(), (32, 32));
        assert_eq!(out.get_pixel(0, 16).0, [255, 0, 0]);
        assert_eq!(out.get_pixel(31, 16).0, [0, 0, 255]);
    }

    #[test]
    fn squash_keeps_the_whole_frame() {
        let tall = DynamicImage::ImageRgb8(RgbImage::from_fn(10, 40, |_, y| {
            if y < 2 { Rgb([0, 255, 0]) } else { Rgb([0, 0, 0]) }
        }));
        let out = fit_square(&tall, 20, FilterType::Nearest, true);
        assert_eq!(out.dimensions(), (20, 20));
        assert_eq!(out.get_pixel(5, 0).0, [0, 255, 0]);
    }

    #[test]
    fn tiny_images_still_fill_the_square() {
        let dot = DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 3, Rgb([9, 9, 9])));
        assert_eq!(fit_square(&dot, 16, FilterType::Triangle, false).dimensions(), (16, 16));
    }
}
