use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::HashMap;
use wfa_balancer::allocation::{assign_chunks, normalize_priorities};

fn build_groups(jobs: usize) -> HashMap<u32, Vec<usize>> {
    let mut groups: HashMap<u32, Vec<usize>> = HashMap::new();
    for index in 0..jobs {
        // Sparse raw priorities so normalization has real work to do.
        let priority = (index % 7 + 1) as u32 * 3;
        groups.entry(priority).or_default().push(index);
    }
    groups
}

fn bench_assign_chunks(c: &mut Criterion) {
    let mut group = c.benchmark_group("assign_chunks");
    for &jobs in &[4usize, 32, 256] {
        let normalized = normalize_priorities(build_groups(jobs));
        group.bench_function(format!("{jobs}_jobs"), |b| {
            b.iter(|| assign_chunks(black_box(&normalized), black_box(1000)))
        });
    }
    group.finish();
}

fn bench_normalize(c: &mut Criterion) {
    let groups = build_groups(256);
    c.bench_function("normalize_priorities_256_jobs", |b| {
        b.iter(|| normalize_priorities(black_box(groups.clone())))
    });
}

criterion_group!(benches, bench_assign_chunks, bench_normalize);
criterion_main!(benches);
