//! Benchmarks for wpforge core operations.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::io::Write;
use wpforge::core::{archive, compiler};
use wpforge::core::types::FileTree;
use wpforge::tripwire::hasher;

fn plugin_zip(files: usize, size: usize) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    zip.start_file("bench/bench.php", options).unwrap();
    zip.write_all(b"<?php\n/**\n * Plugin Name: Bench\n */\n").unwrap();
    let body = "x".repeat(size);
    for i in 0..files {
        zip.start_file(format!("bench/includes/file-{i}.php"), options)
            .unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

fn bench_blueprint_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("blueprint_compile");
    for steps in [1, 10, 100] {
        let step = r#"{"step":"installPlugin","pluginZipFile":{"resource":"wordpress.org/plugins","slug":"hello-dolly"},"options":{"activate":true}}"#;
        let json = format!(
            r#"{{"preferredVersions":{{"php":"8.2","wp":"latest"}},"steps":[{}]}}"#,
            vec![step; steps].join(",")
        );
        group.bench_with_input(BenchmarkId::from_parameter(steps), &json, |b, json| {
            b.iter(|| {
                let blueprint = compiler::parse_blueprint(black_box(json)).unwrap();
                let manifest = compiler::compile(&blueprint);
                black_box(compiler::validate_manifest(&manifest));
            });
        });
    }
    group.finish();
}

fn bench_archive_unpack(c: &mut Criterion) {
    let mut group = c.benchmark_group("archive_unpack");
    for files in [10, 100, 500] {
        let bytes = plugin_zip(files, 1024);
        group.bench_with_input(BenchmarkId::from_parameter(files), &bytes, |b, bytes| {
            b.iter(|| {
                let tree = archive::unpack("bench.zip", black_box(bytes)).unwrap();
                black_box(tree);
            });
        });
    }
    group.finish();
}

fn bench_hash_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_tree");
    for files in [10, 100, 1000] {
        let mut tree = FileTree::new();
        for i in 0..files {
            tree.insert(&format!("wp-content/plugins/p/f-{i}.php"), vec![0xABu8; 4096])
                .unwrap();
        }
        group.bench_with_input(BenchmarkId::from_parameter(files), &tree, |b, tree| {
            b.iter(|| black_box(hasher::hash_tree(black_box(tree))));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_blueprint_compile,
    bench_archive_unpack,
    bench_hash_tree
);
criterion_main!(benches);
