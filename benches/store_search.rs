use criterion::{criterion_group, BenchmarkId, Criterion};
use image_finder::config::QueryConfig;
use image_finder::embedding::l2_normalize;
use image_finder::{IndexStore, IndexedImage, MetadataRecord, QueryEngine};
use std::hint::black_box;
use std::sync::Arc;

const DIM: usize = 512;
const SIZES: &[usize] = &[1_000, 10_000, 50_000];

/// Small deterministic generator, enough to spread vectors over the sphere.
struct Lcg(u64);

impl Lcg {
    #[allow(clippy::cast_precision_loss)]
    fn next_f32(&mut self) -> f32 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        ((self.0 >> 40) as f32 / (1u64 << 24) as f32) - 0.5
    }

    fn unit_vector(&mut self) -> Vec<f32> {
        let mut v: Vec<f32> = (0..DIM).map(|_| self.next_f32()).collect();
        l2_normalize(&mut v).expect("random vector is non-zero");
        v
    }
}

fn synthetic_store(size: usize, rng: &mut Lcg) -> IndexStore {
    let entries = (0..size)
        .map(|i| IndexedImage {
            vector: rng.unit_vector(),
            record: MetadataRecord {
                image_path: format!("/data/artist-{i}_work-{i}-1900.jpg"),
                artist: format!("artist {i}"),
                genre: "genre".to_owned(),
                title: None,
            },
        })
        .collect();
    IndexStore::from_entries(DIM, entries).expect("valid synthetic index")
}

fn benchmark_search(c: &mut Criterion) {
    let mut rng = Lcg(42);
    let query = rng.unit_vector();

    let mut group = c.benchmark_group("search");
    group.sample_size(20);
    for &size in SIZES {
        let engine = QueryEngine::new(
            Arc::new(synthetic_store(size, &mut rng)),
            QueryConfig::default(),
        );

        group.bench_with_input(BenchmarkId::new("store/top4", size), &size, |b, _| {
            b.iter(|| engine.store().search(black_box(&query), 4));
        });

        group.bench_with_input(BenchmarkId::new("engine/find_similar", size), &size, |b, _| {
            b.iter(|| engine.find_similar(black_box(&query), 3));
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_search);

fn main() {
    let mut criterion = Criterion::default();
    let args: Vec<String> = std::env::args().collect();
    let has_ide_flags = args.iter().any(|arg| {
        arg.starts_with("--format")
            || arg.starts_with("-Z")
            || arg == "--show-output"
            || arg == "--no-fail-fast"
    });
    if !has_ide_flags {
        criterion = criterion.configure_from_args();
    }
    benchmark_search(&mut criterion);
}
