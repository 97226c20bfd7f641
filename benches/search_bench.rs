//! Stacks Search Benchmarks
//!
//! Benchmarks for the engine's hot paths: cosine vector scan and BM25
//! scoring, run with `cargo bench`.

use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stacks_core::index::InvertedIndex;
use stacks_core::math::cosine;
use stacks_core::stacks::{Stacks, StacksConfig};

fn sample_embedding(seed: usize, dim: usize) -> Vec<f32> {
    (0..dim).map(|i| ((seed * dim + i) as f32).sin()).collect()
}

fn bench_cosine_similarity(c: &mut Criterion) {
    let a = sample_embedding(1, 256);
    let b = sample_embedding(2, 256);

    c.bench_function("cosine_256d", |bencher| {
        bencher.iter(|| black_box(cosine(&a, &b, None, None)));
    });
}

fn bench_stacks_linear_scan(c: &mut Criterion) {
    let mut stacks = Stacks::new(StacksConfig::default());
    for i in 0..1000 {
        stacks
            .add(format!("entry number {i}"), sample_embedding(i, 64), HashMap::new())
            .unwrap();
    }
    let query = sample_embedding(42, 64);

    c.bench_function("stacks_search_1000x64d", |bencher| {
        bencher.iter(|| black_box(stacks.search(&query, 10, 0.0)));
    });
}

fn bench_bm25_scoring(c: &mut Criterion) {
    let mut index = InvertedIndex::new();
    let corpus = [
        "rust programming language systems",
        "python programming language scripting",
        "cooking italian pasta recipes",
        "javascript web development frameworks",
        "rust ownership borrowing memory safety",
    ];
    for (i, text) in corpus.iter().cycle().take(1000).enumerate() {
        index.add(&format!("doc-{i}"), text);
    }

    c.bench_function("bm25_score_1000_docs", |bencher| {
        bencher.iter(|| black_box(index.score("rust programming")));
    });
}

criterion_group!(benches, bench_cosine_similarity, bench_stacks_linear_scan, bench_bm25_scoring);
criterion_main!(benches);
