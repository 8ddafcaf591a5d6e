//! Benchmarks for the structured output recovery cascade.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stagewright::recovery::Recoverer;

const CLEAN: &str = r#"{"score": 8, "scoreRationale": "Strong regional demand", "factors": ["wages", "growth"]}"#;

const FENCED: &str = "Here is the assessment you asked for.\n\n```json\n{\n  \"score\": 7,\n  // demand is seasonal\n  \"scoreRationale\": \"Steady demand\",\n  \"factors\": [\"wages\", \"growth\",],\n}\n```\nLet me know if you need more.";

const TRUNCATED: &str = "{\"score\": 6, \"scoreRationale\": \"Moderate outlook\", \"factors\": [\"wages\", \"certif";

const SALVAGE_ONLY: &str = "The score: I'd say \"score\": 5 overall, and \"scoreRationale\": \"Limited openings\" given {broken";

fn recovery_benchmark(c: &mut Criterion) {
    let recoverer = Recoverer::scoring();
    let mut group = c.benchmark_group("recovery");

    group.bench_function("clean", |b| b.iter(|| recoverer.recover(black_box(CLEAN))));
    group.bench_function("fenced", |b| b.iter(|| recoverer.recover(black_box(FENCED))));
    group.bench_function("truncated", |b| b.iter(|| recoverer.recover(black_box(TRUNCATED))));
    group.bench_function("salvage_only", |b| b.iter(|| recoverer.recover(black_box(SALVAGE_ONLY))));

    group.finish();
}

criterion_group!(benches, recovery_benchmark);
criterion_main!(benches);
