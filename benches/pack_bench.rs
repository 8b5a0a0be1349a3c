use criterion::{black_box, criterion_group, criterion_main, Criterion};
use respack::io_stream::{PackageReader, PackageWriter};
use std::io::Cursor;

fn sample_writer(files: usize, size: usize) -> PackageWriter {
    let mut w = PackageWriter::new();
    for i in 0..files {
        w.add_bytes(vec![(i % 251) as u8; size], &format!("assets/group{}/file_{i}.bin", i % 8));
    }
    w
}

fn bench_pack(c: &mut Criterion) {
    let one = sample_writer(1, 1024 * 1024);
    c.bench_function("pack_1x1mb", |b| {
        b.iter(|| {
            let mut buf = Vec::with_capacity(1024 * 1024 + 128);
            one.pack_all(&mut buf, 0).unwrap();
            black_box(buf);
        })
    });

    let many = sample_writer(1000, 256);
    c.bench_function("pack_1000x256b", |b| {
        b.iter(|| {
            let mut buf = Vec::new();
            many.pack_all(&mut buf, 0).unwrap();
            black_box(buf);
        })
    });
}

fn bench_open_and_read(c: &mut Criterion) {
    let mut buf = Vec::new();
    sample_writer(1000, 256).pack_all(&mut buf, 0).unwrap();

    c.bench_function("open_index_1000", |b| {
        b.iter(|| PackageReader::open(Cursor::new(black_box(buf.clone()))).unwrap())
    });

    let reader = PackageReader::open(Cursor::new(buf)).unwrap();
    c.bench_function("read_all_by_path", |b| {
        b.iter(|| {
            for i in (0..1000).step_by(37) {
                let path = format!("assets/group{}/file_{i}.bin", i % 8);
                black_box(reader.read_all_bytes(path.as_str()).unwrap());
            }
        })
    });

    c.bench_function("list_directory", |b| {
        b.iter(|| black_box(reader.list_by_directory("assets/group3").count()))
    });
}

criterion_group!(benches, bench_pack, bench_open_and_read);
criterion_main!(benches);
