#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use chainlog::{
    FactSource, InMemoryEdb, IterationRange, JoinExecutor, JoinStep, JoinStrategy, Literal,
    Predicate, PredicateKind, ReasonerConfig, Segment, SegmentBuilder, Term, WorkerPool,
};
use indexmap::IndexMap;

const ROWS: u64 = 20_000;

fn store() -> (InMemoryEdb, Literal) {
    let edge = Predicate::new(0, PredicateKind::Edb, 2).unwrap();
    let mut builder = InMemoryEdb::builder();
    builder
        .add_facts(edge, (0..ROWS).map(|i| [i % 2_000, (i * 13) % ROWS]))
        .unwrap();
    let literal = Literal::new(edge, [Term::Variable(0), Term::Variable(1)]).unwrap();
    (builder.build(), literal)
}

/// Benchmark for every strategy able to run a one-key join
fn bench_strategies(c: &mut Criterion) {
    let (edb, literal) = store();
    let tables = IndexMap::new();
    let source = FactSource::new(&tables, &edb);
    let pool = WorkerPool::sequential();
    let config = ReasonerConfig::default();
    let executor = JoinExecutor::new(&pool, &config);
    let left = Segment::from_rows(2, (0..500u64).map(|i| [i * 3, i])).unwrap();

    let mut group = c.benchmark_group("one_key_join");
    let wide = JoinStep {
        literal: &literal,
        range: IterationRange::ALL,
        coordinates: &[(0, 0)],
        from_left: &[(0, 1)],
        from_right: &[(1, 1)],
        output_width: 2,
        self_filter: None,
    };
    for strategy in [JoinStrategy::SelectiveHash, JoinStrategy::SortMerge] {
        group.bench_with_input(
            BenchmarkId::new("wide", format!("{strategy:?}")),
            &strategy,
            |b, &strategy| {
                b.iter(|| {
                    let mut out = SegmentBuilder::new(2);
                    executor
                        .join_with(strategy, &source, &left, &wide, &mut out)
                        .unwrap();
                    black_box(out.len())
                });
            },
        );
    }
    let semi = JoinStep {
        from_right: &[],
        output_width: 1,
        from_left: &[(0, 1)],
        ..wide
    };
    group.bench_function("verificative", |b| {
        b.iter(|| {
            let mut out = SegmentBuilder::new(1);
            executor
                .join_with(JoinStrategy::Verificative, &source, &left, &semi, &mut out)
                .unwrap();
            black_box(out.len())
        });
    });
    let narrow = JoinStep {
        from_left: &[],
        from_right: &[(0, 1)],
        output_width: 1,
        ..wide
    };
    group.bench_function("two_to_one", |b| {
        b.iter(|| {
            let mut out = SegmentBuilder::new(1);
            executor
                .join_with(JoinStrategy::TwoToOne, &source, &left, &narrow, &mut out)
                .unwrap();
            black_box(out.len())
        });
    });
    group.finish();
}

/// Benchmark for sorting a wide segment with and without a pool
fn bench_sort(c: &mut Criterion) {
    let segment =
        Segment::from_rows(3, (0..ROWS).map(|i| [(i * 31) % 1_000, i % 7, ROWS - i])).unwrap();
    let mut group = c.benchmark_group("segment_sort");
    for threads in [1, 4] {
        let pool = WorkerPool::new(threads).unwrap().with_sort_threshold(1_024);
        group.bench_with_input(BenchmarkId::from_parameter(threads), &pool, |b, pool| {
            b.iter(|| black_box(segment.sort(&[0, 1], pool).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_strategies, bench_sort);
criterion_main!(benches);
