use crate::config::QueryConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::store::{IndexStore, Neighbor};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// The catalog image a query was recognised as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchInfo {
    pub title: String,
    pub artist: String,
    pub genre: String,
    pub image_path: String,
    pub similarity_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedImage {
    pub rank: usize,
    pub similarity_score: f32,
    pub title: String,
    pub artist: String,
    pub genre: String,
    pub image_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResponse {
    /// Name of the uploaded file, when the query came in over HTTP.
    pub query_image: Option<String>,
    pub has_perfect_match: bool,
    pub input_image_info: Option<MatchInfo>,
    pub similar_images: Vec<RankedImage>,
    pub total_found: usize,
}

impl From<&Neighbor<'_>> for MatchInfo {
    fn from(hit: &Neighbor<'_>) -> Self {
        let record = &hit.entry.record;
        Self {
            title: record.display_title(),
            artist: record.artist.clone(),
            genre: record.genre.clone(),
            image_path: record.image_path.clone(),
            similarity_score: hit.score,
        }
    }
}

impl RankedImage {
    fn new(rank: usize, hit: &Neighbor<'_>) -> Self {
        let record = &hit.entry.record;
        Self {
            rank,
            similarity_score: hit.score,
            title: record.display_title(),
            artist: record.artist.clone(),
            genre: record.genre.clone(),
            image_path: record.image_path.clone(),
        }
    }
}

/// Nearest-neighbour queries over a loaded, read-only index.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    store: Arc<IndexStore>,
    config: QueryConfig,
}

impl QueryEngine {
    #[must_use]
    pub const fn new(store: Arc<IndexStore>, config: QueryConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    #[must_use]
    pub const fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// How many neighbours to fetch for `top_k` results.
    ///
    /// One extra is fetched from `overfetch_min_top_k` upwards so a perfect
    /// match can be dropped without shortening the list. Below that the
    /// request is taken as is.
    #[must_use]
    pub const fn search_width(&self, top_k: usize) -> usize {
        if top_k >= self.config.overfetch_min_top_k {
            top_k + 1
        } else {
            top_k
        }
    }

    /// Rank the catalog against an already embedded, unit-length query.
    pub fn find_similar(&self, query: &[f32], top_k: usize) -> Result<SimilarityResponse> {
        let top_k = self
            .config
            .check_top_k(i64::try_from(top_k).unwrap_or(i64::MAX))?;

        let hits = self.store.search(query, self.search_width(top_k))?;

        let perfect = hits
            .first()
            .filter(|hit| hit.score >= self.config.perfect_match_threshold);
        let input_image_info = perfect.map(MatchInfo::from);
        if let Some(info) = &input_image_info {
            debug!(
                "Query matches catalog image {} (score {:.4})",
                info.image_path, info.similarity_score
            );
        }

        let similar_images: Vec<RankedImage> = hits
            .iter()
            .skip(usize::from(perfect.is_some()))
            .take(top_k)
            .enumerate()
            .map(|(i, hit)| RankedImage::new(i + 1, hit))
            .collect();

        Ok(SimilarityResponse {
            query_image: None,
            has_perfect_match: input_image_info.is_some(),
            input_image_info,
            total_found: similar_images.len(),
            similar_images,
        })
    }

    /// Validate `top_k`, embed `image` and rank the catalog against it.
    ///
    /// `top_k` is checked before any model work happens. The image is
    /// consumed and released whether or not the query succeeds.
    pub fn find_similar_image<E>(
        &self,
        embedder: &mut E,
        image: DynamicImage,
        top_k: usize,
    ) -> Result<SimilarityResponse>
    where
        E: EmbeddingProvider + ?Sized,
    {
        self.config
            .check_top_k(i64::try_from(top_k).unwrap_or(i64::MAX))?;
        let embedding = embedder.embed_one(&image)?;
        drop(image);
        let query = embedding.to_vec();
        self.find_similar(&query, top_k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::l2_normalize;
    use crate::error::FinderError;
    use crate::metadata::MetadataRecord;
    use crate::store::IndexedImage;

    /// Unit vectors in 2D at the given angles (degrees).
    fn engine(angles: &[f32]) -> QueryEngine {
        let entries = angles
            .iter()
            .enumerate()
            .map(|(i, deg)| {
                let rad = deg.to_radians();
                IndexedImage {
                    vector: vec![rad.cos(), rad.sin()],
                    record: MetadataRecord {
                        image_path: format!("/data/artist_work-{i}-1900.jpg"),
                        artist: format!("artist {i}"),
                        genre: "g".into(),
                        title: None,
                    },
                }
            })
            .collect();
        let store = IndexStore::from_entries(2, entries).unwrap();
        QueryEngine::new(Arc::new(store), QueryConfig::default())
    }

    fn at(deg: f32) -> Vec<f32> {
        let rad = deg.to_radians();
        let mut v = vec![rad.cos(), rad.sin()];
        l2_normalize(&mut v).unwrap();
        v
    }

    fn artists(resp: &SimilarityResponse) -> Vec<&str> {
        resp.similar_images.iter().map(|r| r.artist.as_str()).collect()
    }

    #[test]
    fn search_width_policy() {
        let engine = engine(&[0.0]);
        assert_eq!(engine.search_width(1), 1);
        assert_eq!(engine.search_width(2), 2);
        assert_eq!(engine.search_width(3), 4);
        assert_eq!(engine.search_width(10), 11);
    }

    #[test]
    fn perfect_match_is_pulled_out_and_ranks_restart() {
        let engine = engine(&[0.0, 10.0, 20.0, 30.0, 40.0]);
        let resp = engine.find_similar(&at(0.0), 3).unwrap();

        assert!(resp.has_perfect_match);
        let info = resp.input_image_info.as_ref().unwrap();
        assert_eq!(info.artist, "artist 0");
        assert_eq!(info.title, "Work");
        assert!(info.similarity_score >= 0.99);

        assert_eq!(artists(&resp), ["artist 1", "artist 2", "artist 3"]);
        let ranks: Vec<_> = resp.similar_images.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, [1, 2, 3]);
        assert_eq!(resp.total_found, 3);
    }

    #[test]
    fn no_perfect_match_keeps_top_hit_first() {
        let engine = engine(&[0.0, 30.0, 60.0, 90.0]);
        let resp = engine.find_similar(&at(20.0), 3).unwrap();

        assert!(!resp.has_perfect_match);
        assert!(resp.input_image_info.is_none());
        assert_eq!(artists(&resp), ["artist 1", "artist 0", "artist 2"]);
        assert_eq!(resp.similar_images[0].rank, 1);
        assert!(resp
            .similar_images
            .windows(2)
            .all(|w| w[0].similarity_score >= w[1].similarity_score));
    }

    #[test]
    fn small_top_k_does_not_overfetch() {
        // With top_k < 3 only top_k hits are fetched, so a perfect match
        // shortens the list.
        let engine = engine(&[0.0, 10.0, 20.0]);
        let resp = engine.find_similar(&at(0.0), 2).unwrap();
        assert!(resp.has_perfect_match);
        assert_eq!(artists(&resp), ["artist 1"]);
        assert_eq!(resp.total_found, 1);

        let resp = engine.find_similar(&at(0.0), 1).unwrap();
        assert!(resp.has_perfect_match);
        assert!(resp.similar_images.is_empty());
        assert_eq!(resp.total_found, 0);
    }

    #[test]
    fn small_index_returns_what_exists() {
        let engine = engine(&[0.0, 45.0]);
        let resp = engine.find_similar(&at(100.0), 10).unwrap();
        assert_eq!(resp.total_found, 2);
        assert_eq!(resp.similar_images.len(), 2);
    }

    #[test]
    fn results_never_exceed_top_k() {
        let angles: Vec<f32> = (0..20u8).map(|i| f32::from(i) * 3.0).collect();
        let engine = engine(&angles);
        for top_k in 1..=10 {
            for query in [at(0.0), at(31.5)] {
                let resp = engine.find_similar(&query, top_k).unwrap();
                assert!(resp.total_found <= top_k);
                let ranks: Vec<_> = resp.similar_images.iter().map(|r| r.rank).collect();
                assert_eq!(ranks, (1..=resp.total_found).collect::<Vec<_>>());
                if let Some(info) = &resp.input_image_info {
                    assert!(resp.similar_images.iter().all(|r| r.image_path != info.image_path));
                }
            }
        }
    }

    #[test]
    fn threshold_comes_from_config() {
        let engine = engine(&[0.0, 20.0]);
        let strict = QueryEngine::new(
            Arc::clone(&engine.store),
            QueryConfig {
                perfect_match_threshold: 1.5,
                ..QueryConfig::default()
            },
        );
        let resp = strict.find_similar(&at(0.0), 3).unwrap();
        assert!(!resp.has_perfect_match);
        assert_eq!(artists(&resp), ["artist 0", "artist 1"]);
    }

    #[test]
    fn stored_titles_win_over_parsed_ones() {
        let entries = vec![IndexedImage {
            vector: vec![1.0, 0.0],
            record: MetadataRecord {
                image_path: "/data/x_y-1900.jpg".into(),
                artist: "a".into(),
                genre: "g".into(),
                title: Some("Stored Title".into()),
            },
        }];
        let store = IndexStore::from_entries(2, entries).unwrap();
        let engine = QueryEngine::new(Arc::new(store), QueryConfig::default());
        let resp = engine.find_similar(&at(80.0), 1).unwrap();
        assert_eq!(resp.similar_images[0].title, "Stored Title");
    }

    #[test]
    fn invalid_top_k_is_rejected() {
        let engine = engine(&[0.0]);
        for top_k in [0, 11] {
            assert!(matches!(
                engine.find_similar(&at(0.0), top_k),
                Err(FinderError::InvalidTopK { .. })
            ));
        }
    }
}
