//! Benchmarks for path sampling, generalization and rule scoring.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::{Rng, SeedableRng};

use akh_mine::config::{RulesConfig, ScoringConfig};
use akh_mine::graph::GraphIndex;
use akh_mine::rule::{Generalizer, Rule, Scorer};
use akh_mine::sample::PathSampler;

/// A random graph of 2k entities, 8 relations and 20k triples.
fn random_graph() -> GraphIndex {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    let triples: Vec<(String, String, String)> = (0..20_000)
        .map(|_| {
            (
                format!("e{}", rng.gen_range(0..2_000)),
                format!("r{}", rng.gen_range(0..8)),
                format!("e{}", rng.gen_range(0..2_000)),
            )
        })
        .collect();
    GraphIndex::from_labels(
        triples
            .iter()
            .map(|(s, r, o)| (s.as_str(), r.as_str(), o.as_str())),
    )
}

/// Cyclic rules mined from the graph itself, so every relation exists.
fn cyclic_rules(graph: &GraphIndex, n: usize) -> Vec<Rule> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(1);
    let sampler = PathSampler::new(graph);
    let generalizer = Generalizer::new(&RulesConfig::default());
    let mut rules = Vec::new();
    while rules.len() < n {
        if let Some(path) = sampler.sample(3, true, None, None, &mut rng) {
            rules.extend(generalizer.generalize(&path, true));
        }
    }
    rules.truncate(n);
    rules
}

fn bench_sample(c: &mut Criterion) {
    let graph = random_graph();
    let sampler = PathSampler::new(&graph);
    let mut rng = rand::rngs::StdRng::seed_from_u64(2);

    c.bench_function("sample_acyclic_2", |bench| {
        bench.iter(|| black_box(sampler.sample(2, false, None, None, &mut rng)))
    });
    c.bench_function("sample_cyclic_3", |bench| {
        bench.iter(|| black_box(sampler.sample(3, true, None, None, &mut rng)))
    });
}

fn bench_generalize(c: &mut Criterion) {
    let graph = random_graph();
    let sampler = PathSampler::new(&graph);
    let generalizer = Generalizer::new(&RulesConfig::default());
    let mut rng = rand::rngs::StdRng::seed_from_u64(3);
    let paths: Vec<_> = std::iter::from_fn(|| Some(sampler.sample(2, false, None, None, &mut rng)))
        .flatten()
        .take(256)
        .collect();

    c.bench_function("generalize_acyclic_256", |bench| {
        bench.iter(|| {
            for p in &paths {
                black_box(generalizer.generalize(p, false));
            }
        })
    });
}

fn bench_score(c: &mut Criterion) {
    let graph = random_graph();
    let cfg = ScoringConfig::default();
    let scorer = Scorer::new(&graph, &cfg);
    let rules = cyclic_rules(&graph, 32);
    let mut rng = rand::rngs::StdRng::seed_from_u64(4);

    c.bench_function("score_cyclic_32", |bench| {
        bench.iter(|| {
            for r in &rules {
                black_box(scorer.score(r, &mut rng).unwrap());
            }
        })
    });
}

criterion_group!(benches, bench_sample, bench_generalize, bench_score);
criterion_main!(benches);
