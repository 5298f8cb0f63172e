use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use limbo_bridge::artifact::{extract, run_exit_cleanup, MemoryBundle};
use limbo_bridge::platform::resolve_for;

/// Benchmark descriptor resolution, including alias normalization
fn bench_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolution");

    for (os, arch) in [("linux", "x86_64"), ("Windows 10", "amd64"), ("macos", "x86_64")] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{os}/{arch}")),
            &(os, arch),
            |b, &(os, arch)| b.iter(|| resolve_for(black_box(os), black_box(arch))),
        );
    }

    group.finish();
}

/// Benchmark extracting artifacts of typical server-library sizes
fn bench_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("extraction");
    let descriptor = resolve_for("linux", "x86_64").expect("linux/x86_64 is supported");

    for size in [1usize << 20, 8 << 20] {
        let bundle =
            MemoryBundle::new().with_resource(descriptor.resource_subpath.clone(), vec![0xAB; size]);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let handle = extract(black_box(&bundle), &descriptor).expect("extraction");
                // Keep the temp dir from filling up across iterations
                let _ = std::fs::remove_file(&handle.temporary_file_path);
            });
            run_exit_cleanup();
        });
    }

    group.finish();
}

criterion_group!(benches, bench_resolution, bench_extraction);
criterion_main!(benches);
