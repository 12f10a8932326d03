//! Offline index construction.
//!
//! Rows whose image cannot be read are skipped together with their metadata,
//! so entry `i` of the resulting store always pairs the vector and record of
//! the same image. A build that loads nothing at all is an error.

use crate::config::BuildConfig;
use crate::embedding::{l2_normalize, EmbeddingProvider};
use crate::error::{FinderError, Result};
use crate::heartbeat::Heartbeat;
use crate::metadata::{read_metadata_table, MetadataRecord};
use crate::store::{IndexStore, IndexedImage};
use crate::utils::open_oriented;
use image::DynamicImage;
use rayon::prelude::*;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

/// Source of decoded images for the builder.
pub trait ImageLoader: Sync {
    fn load(&self, path: &Path) -> Result<DynamicImage>;
}

/// Reads images from the local filesystem, honouring EXIF orientation.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsImageLoader;

impl ImageLoader for FsImageLoader {
    fn load(&self, path: &Path) -> Result<DynamicImage> {
        open_oriented(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildReport {
    pub indexed: usize,
    pub skipped: usize,
}

pub struct IndexBuilder {
    config: BuildConfig,
}

impl IndexBuilder {
    pub fn new(config: BuildConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Load, embed and collect every row that has a readable image.
    pub fn build<L, E>(
        &self,
        rows: &[MetadataRecord],
        loader: &L,
        embedder: &mut E,
    ) -> Result<(IndexStore, BuildReport)>
    where
        L: ImageLoader + ?Sized,
        E: EmbeddingProvider + ?Sized,
    {
        let _heartbeat = Heartbeat::start(self.config.heartbeat_interval)?;
        let started = Instant::now();
        let batch_size = self.config.batch_size;

        let mut batch = Batch {
            store: IndexStore::with_capacity(embedder.dim(), rows.len()),
            pending: Vec::with_capacity(batch_size),
            batches_done: 0,
        };
        let mut skipped = 0;

        for window in rows.chunks(batch_size) {
            let decoded: Vec<Result<DynamicImage>> = window
                .par_iter()
                .map(|row| loader.load(Path::new(&row.image_path)))
                .collect();

            for (row, image) in window.iter().zip(decoded) {
                match image {
                    Ok(image) => batch.pending.push((row.clone(), image)),
                    Err(e) => {
                        skipped += 1;
                        warn!("[skip] {}: {e}", row.image_path);
                    }
                }
                if batch.pending.len() == batch_size {
                    batch.flush(embedder)?;
                }
            }
        }
        batch.flush(embedder)?;

        let store = batch.store;
        info!("Loaded {} images, skipped {skipped}", store.len());
        if store.is_empty() {
            return Err(FinderError::NoImagesLoaded { rows: rows.len() });
        }
        info!(
            "Embedding done. {} vectors of dim {} in {:.1?}",
            store.len(),
            store.dim(),
            started.elapsed()
        );

        let report = BuildReport {
            indexed: store.len(),
            skipped,
        };
        Ok((store, report))
    }
}

struct Batch {
    store: IndexStore,
    pending: Vec<(MetadataRecord, DynamicImage)>,
    batches_done: usize,
}

impl Batch {
    fn flush<E: EmbeddingProvider + ?Sized>(&mut self, embedder: &mut E) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.batches_done += 1;
        let first = self.store.len();
        info!(
            "Embedding batch {} (images {}-{})",
            self.batches_done,
            first,
            first + self.pending.len() - 1
        );

        let (records, images): (Vec<_>, Vec<_>) = self.pending.drain(..).unzip();
        let embeddings = embedder.embed_batch(&images)?;
        drop(images);

        if embeddings.nrows() != records.len() {
            return Err(FinderError::Inference(format!(
                "embedder returned {} vectors for {} images",
                embeddings.nrows(),
                records.len()
            )));
        }
        for (record, row) in records.into_iter().zip(embeddings.rows()) {
            let mut vector = row.to_vec();
            l2_normalize(&mut vector)?;
            self.store.push(IndexedImage { vector, record })?;
        }
        Ok(())
    }
}

/// Read the metadata table, build the index and persist it to `index_dir`.
///
/// Nothing is written unless the build succeeds.
pub fn build_index_dir<L, E>(
    metadata_csv: &Path,
    index_dir: &Path,
    config: BuildConfig,
    loader: &L,
    embedder: &mut E,
) -> Result<BuildReport>
where
    L: ImageLoader + ?Sized,
    E: EmbeddingProvider + ?Sized,
{
    let rows = read_metadata_table(metadata_csv)?;
    let (store, report) = IndexBuilder::new(config)?.build(&rows, loader, embedder)?;
    store.save(index_dir)?;
    info!("[OK] saved index and metadata to {}", index_dir.display());
    Ok(report)
}
