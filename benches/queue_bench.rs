use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use seine::layout;
use seine::queue::{self, SliceWriter, VecReader};

fn fresh_region(capacity: usize) -> Vec<u8> {
    let mut region = vec![0u8; capacity];
    layout::format(&mut region, capacity as i64).unwrap();
    region
}

fn benchmark_round_trip_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("RoundTrip");

    for size in [64usize, 1024, 16384, 65536].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("copy", size), size, |b, &size| {
            let mut region = fresh_region(size + (1 << 16));
            let payload = vec![0xCDu8; size];
            let mut out = Vec::with_capacity(size);

            b.iter(|| {
                queue::write(&mut region, size as i64, &mut SliceWriter::new(&payload)).unwrap();
                out.clear();
                queue::read(&mut region, &mut VecReader::new(&mut out)).unwrap();
            });
        });
    }

    group.finish();
}

fn benchmark_in_place_callbacks(c: &mut Criterion) {
    let mut group = c.benchmark_group("InPlaceCallbacks");

    for size in [1024usize, 65536].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("fill_scan", size), size, |b, &size| {
            let mut region = fresh_region(size + (1 << 16));

            b.iter(|| {
                // Touch the window directly instead of copying through a
                // staging buffer.
                let mut fill = |window: &mut [u8]| {
                    window.fill(0xEE);
                    seine::OpStatus::Completed
                };
                queue::write(&mut region, size as i64, &mut fill).unwrap();

                let mut checksum = 0u64;
                let mut scan = |window: &[u8]| {
                    checksum = window.iter().map(|&b| b as u64).sum();
                    seine::OpStatus::Completed
                };
                queue::read(&mut region, &mut scan).unwrap();
                checksum
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_round_trip_throughput,
    benchmark_in_place_callbacks
);
criterion_main!(benches);
