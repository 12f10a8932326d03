use crate::error::Result;
use image::{DynamicImage, ImageDecoder, ImageReader};
use std::io::Cursor;
use std::path::Path;

/// Open an image file, apply its EXIF orientation and convert it to RGB8.
pub fn open_oriented(path: impl AsRef<Path>) -> Result<DynamicImage> {
    let reader = ImageReader::open(path)?.with_guessed_format()?;
    orient(reader)
}

/// Same as [`open_oriented`] for an in-memory encoded image.
pub fn decode_oriented(bytes: &[u8]) -> Result<DynamicImage> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    orient(reader)
}

fn orient<R: std::io::BufRead + std::io::Seek>(reader: ImageReader<R>) -> Result<DynamicImage> {
    let mut decoder = reader.into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(DynamicImage::ImageRgb8(image.into_rgb8()))
}
