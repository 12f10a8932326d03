#![allow(dead_code)]

use image::{DynamicImage, Rgb, RgbImage};
use image_finder::{EmbeddingProvider, MetadataRecord, Result};
use ndarray::Array2;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Embeds an image as its normalized mean colour. Same pixels, same vector.
#[derive(Default)]
pub struct MeanColourEmbedder {
    pub calls: usize,
}

impl EmbeddingProvider for MeanColourEmbedder {
    fn dim(&self) -> usize {
        3
    }

    fn embed_batch(&mut self, images: &[DynamicImage]) -> Result<Array2<f32>> {
        self.calls += 1;
        let mut out = Array2::zeros((images.len(), 3));
        for (i, img) in images.iter().enumerate() {
            let rgb = img.to_rgb8();
            let n = (rgb.width() * rgb.height()) as f32;
            for pixel in rgb.pixels() {
                for c in 0..3 {
                    out[[i, c]] += f32::from(pixel.0[c]) / n;
                }
            }
        }
        image_finder::embedding::l2_normalize_rows(&mut out)?;
        Ok(out)
    }
}

/// Colour `i` of a fan of hues 10 degrees apart in the red/green plane.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn fan_colour(i: usize) -> [u8; 3] {
    let theta = (i as f32 * 10.0).to_radians();
    [
        (theta.cos() * 255.0).round() as u8,
        (theta.sin() * 255.0).round() as u8,
        0,
    ]
}

pub fn png_bytes(colour: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(8, 8, Rgb(colour));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("encode png");
    bytes
}

pub fn write_png(dir: &Path, name: &str, colour: [u8; 3]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, png_bytes(colour)).expect("write png");
    path
}

pub fn record(image_path: &Path, artist: &str, title: Option<&str>) -> MetadataRecord {
    MetadataRecord {
        image_path: image_path.to_string_lossy().into_owned(),
        artist: artist.to_owned(),
        genre: "Impressionism".to_owned(),
        title: title.map(str::to_owned),
    }
}

pub fn write_csv(path: &Path, rows: &[MetadataRecord]) {
    let mut out = String::from("image_path,artist,genre,title\n");
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{}\n",
            row.image_path,
            row.artist,
            row.genre,
            row.title.as_deref().unwrap_or("")
        ));
    }
    fs::write(path, out).expect("write csv");
}
