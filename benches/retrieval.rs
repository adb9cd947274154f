//! Performance benchmarks for the per-turn and batch paths

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use ltm::{CreateMemoryInput, LtmConfig, MemoryEngine};

const TOPICS: &[(&str, &str)] = &[
    ("work", "Weekly planning meeting with the project team"),
    ("health", "Morning run before breakfast"),
    ("finance", "Monthly budget review"),
    ("travel", "Prefers window seats on long flights"),
    ("tool", "Uses vim for quick edits"),
];

fn seeded_engine(count: usize) -> MemoryEngine {
    let engine = MemoryEngine::open_in_memory(LtmConfig::default()).unwrap();
    for i in 0..count {
        let (tag, content) = TOPICS[i % TOPICS.len()];
        let input = CreateMemoryInput::new("bench", format!("{} #{}", content, i), &[tag], (i % 8) as i32 + 3);
        engine.store().create(&input).unwrap();
    }
    engine
}

fn bench_create(c: &mut Criterion) {
    let engine = seeded_engine(0);

    let mut group = c.benchmark_group("memory_create");
    group.throughput(Throughput::Elements(1));
    group.bench_function("classified", |b| {
        b.iter(|| {
            let input = CreateMemoryInput::new("bench", "Standup moved to ten", &["work"], 5);
            engine.store().create(black_box(&input)).unwrap()
        })
    });
    group.finish();
}

fn bench_retrieve_context(c: &mut Criterion) {
    let mut group = c.benchmark_group("retrieve_context");

    for count in [50, 500, 5000].iter() {
        let engine = seeded_engine(*count);
        group.bench_with_input(BenchmarkId::new("memories", count), count, |b, _| {
            b.iter(|| {
                engine
                    .retrieve_context("bench", black_box("project meeting budget"), None)
                    .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_format(c: &mut Criterion) {
    let engine = seeded_engine(20);
    let memories = engine.retrieve("bench", "", Some(20)).unwrap();

    let mut group = c.benchmark_group("format_for_injection");
    for max_length in [200usize, 800, 4000].iter() {
        group.bench_with_input(BenchmarkId::new("max_length", max_length), max_length, |b, &max| {
            b.iter(|| engine.optimizer().format_for_injection(black_box(&memories), max))
        });
    }
    group.finish();
}

fn bench_batch_passes(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_passes");
    group.sample_size(10);

    for count in [100, 400].iter() {
        group.bench_with_input(BenchmarkId::new("consolidate", count), count, |b, &count| {
            b.iter_batched(
                || seeded_engine(count),
                |engine| engine.consolidate("bench").unwrap(),
                BatchSize::PerIteration,
            )
        });
        group.bench_with_input(BenchmarkId::new("lifecycle", count), count, |b, &count| {
            b.iter_batched(
                || seeded_engine(count),
                |engine| engine.run_lifecycle("bench").unwrap(),
                BatchSize::PerIteration,
            )
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_create,
    bench_retrieve_context,
    bench_format,
    bench_batch_passes,
);

criterion_main!(benches);
