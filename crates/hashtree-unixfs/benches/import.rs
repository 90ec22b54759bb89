//! Import/export throughput with different chunking and tree layouts.
//!
//! Run with: cargo bench -p hashtree-unixfs

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hashtree_unixfs::{
    to_hex, ChunkStrategy, Exporter, ImportOptions, Importer, MemoryStore, TreeStrategy,
    DEFAULT_CHUNK_SIZE,
};
use std::sync::Arc;

fn random_data(size: usize) -> Vec<u8> {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

fn bench_import(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("import");

    let sizes = [(1, "1MB"), (10, "10MB")];

    let configs: Vec<(&str, ImportOptions)> = vec![
        ("256KB_balanced", ImportOptions::default()),
        (
            "16KB_balanced",
            ImportOptions::default().with_chunk_size(16 * 1024),
        ),
        (
            "16KB_trickle",
            ImportOptions::default()
                .with_chunk_size(16 * 1024)
                .with_tree_strategy(TreeStrategy::Trickle),
        ),
        (
            "256KB_cdc",
            ImportOptions::default().with_chunk_strategy(ChunkStrategy::Cdc),
        ),
    ];

    for (size_mb, size_name) in sizes {
        let size = size_mb * 1024 * 1024;
        let data = random_data(size);
        group.throughput(Throughput::Bytes(size as u64));

        for (config_name, options) in &configs {
            group.bench_with_input(BenchmarkId::new(*config_name, size_name), &data, |b, data| {
                b.iter(|| {
                    rt.block_on(async {
                        let importer =
                            Importer::new(Arc::new(MemoryStore::new()), options.clone());
                        importer
                            .import_file("bench.bin", black_box(data.clone()))
                            .await
                            .unwrap()
                    })
                })
            });
        }
    }

    group.finish();
}

fn bench_export(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("export");

    let size = 10 * 1024 * 1024;
    let data = random_data(size);
    group.throughput(Throughput::Bytes(size as u64));

    for (name, chunk_size) in [("256KB", DEFAULT_CHUNK_SIZE), ("16KB", 16 * 1024)] {
        let store = Arc::new(MemoryStore::new());
        let importer = Importer::new(
            store.clone(),
            ImportOptions::default().with_chunk_size(chunk_size),
        );
        let root = rt
            .block_on(importer.import_file("bench.bin", data.clone()))
            .unwrap();
        let target = to_hex(&root.hash);
        let exporter = Exporter::new(store);

        group.bench_function(BenchmarkId::new("read_file", name), |b| {
            b.iter(|| {
                rt.block_on(async { exporter.read_file(black_box(&target)).await.unwrap() })
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_import, bench_export);
criterion_main!(benches);
