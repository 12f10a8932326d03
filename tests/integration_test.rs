//! Runs against the real CLIP vision export. Needs the model in the local
//! Hugging Face cache (or network access), so these are opt-in:
//! `cargo test -- --ignored`.

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use image::{DynamicImage, Rgb, RgbImage};
    use image_finder::config::{BuildConfig, ModelSource, QueryConfig, DEFAULT_MODEL_ID};
    use image_finder::embedding::is_unit_norm;
    use image_finder::{build_index_dir, FsImageLoader, IndexStore, QueryEngine, VisionEmbedder};
    use std::fmt::Write as _;
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;

    const OPENAI_DIM: usize = 512;

    fn embedder() -> Result<VisionEmbedder> {
        let source = ModelSource {
            model_id: DEFAULT_MODEL_ID.to_owned(),
            ..ModelSource::default()
        };
        Ok(VisionEmbedder::from_source(&source)?)
    }

    /// Vertical stripes, so the images differ in more than mean colour.
    fn striped(a: [u8; 3], b: [u8; 3], width: u32) -> DynamicImage {
        let img = RgbImage::from_fn(320, 240, |x, _| {
            if (x / width) % 2 == 0 { Rgb(a) } else { Rgb(b) }
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    #[ignore = "needs the CLIP model"]
    fn embeddings_are_unit_length() -> Result<()> {
        let mut embedder = embedder()?;
        let images = vec![
            striped([200, 30, 30], [20, 20, 20], 8),
            striped([30, 200, 30], [240, 240, 240], 40),
            DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 512, Rgb([0, 0, 255]))),
        ];
        let embs = embedder.embed_images(&images)?;
        assert_eq!(embs.dim(), (3, OPENAI_DIM), "Vision embedding shape mismatch");
        for row in embs.rows() {
            let row = row.to_vec();
            assert!(is_unit_norm(&row));
        }
        Ok(())
    }

    #[test]
    #[ignore = "needs the CLIP model"]
    fn catalogued_image_is_a_perfect_match() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let palettes = [
            ([200, 30, 30], [20, 20, 20], 8),
            ([30, 200, 30], [240, 240, 240], 40),
            ([20, 20, 200], [250, 220, 0], 16),
            ([120, 60, 10], [10, 120, 160], 4),
        ];
        let mut csv = String::from("image_path,artist,genre,title\n");
        for (i, (a, b, w)) in palettes.iter().enumerate() {
            let path = dir.path().join(format!("artist-{i}_stripes-{w}-2001.png"));
            striped(*a, *b, *w).save(&path)?;
            writeln!(csv, "{},Artist {i},Abstract,", path.display())?;
        }
        let meta = dir.path().join("meta.csv");
        fs::write(&meta, csv)?;

        let mut embedder = embedder()?;
        let index_dir = dir.path().join("index");
        let config = BuildConfig {
            batch_size: 3,
            heartbeat_interval: Duration::from_secs(5),
        };
        let report = build_index_dir(&meta, &index_dir, config, &FsImageLoader, &mut embedder)?;
        assert_eq!(report.indexed, palettes.len());

        let store = IndexStore::load(&index_dir)?;
        assert_eq!(store.dim(), OPENAI_DIM);
        let engine = QueryEngine::new(Arc::new(store), QueryConfig::default());

        let (a, b, w) = palettes[2];
        let resp = engine.find_similar_image(&mut embedder, striped(a, b, w), 3)?;
        assert!(resp.has_perfect_match, "identical image should match itself");
        let info = resp.input_image_info.expect("match info");
        assert_eq!(info.artist, "Artist 2");
        assert_eq!(info.title, "Stripes");
        assert_eq!(resp.total_found, 3);
        Ok(())
    }
}
