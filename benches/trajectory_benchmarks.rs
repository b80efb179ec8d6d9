//! Trajectory append benchmarks
//!
//! - buffered appends per backend at several chunk sizes
//! - resume cost (replay / metadata scan) of a persisted trajectory
//!
//! Measure before tuning the default chunk size.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use runstore::storage::{AccessMode, BackendKind, Storage, StorageOptions, TextFormat};
use runstore::Array;
use tempfile::TempDir;

const FRAMES: usize = 256;
const FRAME_WIDTH: usize = 64;

#[allow(clippy::cast_precision_loss)]
fn frame(step: usize) -> Array {
    Array::from((0..FRAME_WIDTH).map(|i| (step * FRAME_WIDTH + i) as f64).collect::<Vec<_>>())
}

fn backends() -> [(&'static str, BackendKind, &'static str); 4] {
    [
        ("memory", BackendKind::Memory, ""),
        ("container", BackendKind::Container, "bench.rsc"),
        ("chunked", BackendKind::Chunked, "bench.chunks"),
        ("json", BackendKind::Text(TextFormat::Json), "bench.json"),
    ]
}

fn write_trajectory(dir: &TempDir, kind: BackendKind, file: &str, chunk_size: usize) -> Storage {
    let mut storage = if kind == BackendKind::Memory {
        Storage::in_memory()
    } else {
        Storage::open_with(
            dir.path().join(file),
            AccessMode::Truncate,
            kind,
            StorageOptions::default(),
        )
        .unwrap()
    };
    {
        let mut root = storage.root_mut();
        let mut writer = root.trajectory_writer("state", chunk_size).unwrap();
        for step in 0..FRAMES {
            writer.append(&frame(step)).unwrap();
        }
        writer.close().unwrap();
    }
    storage
}

/// Benchmark buffered appends
fn bench_trajectory_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("trajectory_append");
    group.sample_size(10);

    for (name, kind, file) in backends() {
        for chunk_size in [1, 16, 64] {
            let dir = TempDir::new().unwrap();
            group.bench_with_input(
                BenchmarkId::new(name, chunk_size),
                &chunk_size,
                |b, &chunk_size| {
                    b.iter(|| {
                        let storage = write_trajectory(&dir, kind, file, chunk_size);
                        black_box(storage);
                    });
                },
            );
        }
    }

    group.finish();
}

/// Benchmark reopening a persisted trajectory for appending
fn bench_resume_position(c: &mut Criterion) {
    let mut group = c.benchmark_group("resume_position");
    group.sample_size(10);

    for (name, kind, file) in backends().into_iter().skip(1) {
        let dir = TempDir::new().unwrap();
        drop(write_trajectory(&dir, kind, file, 16));
        let path = dir.path().join(file);

        group.bench_function(name, |b| {
            b.iter(|| {
                let storage =
                    Storage::open_with(&path, AccessMode::Read, kind, StorageOptions::default())
                        .unwrap();
                black_box(storage.root().frame_count("state").unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_trajectory_append, bench_resume_position);
criterion_main!(benches);
