#![allow(
    clippy::tests_outside_test_module,
    clippy::unwrap_used,
    reason = "benchmark"
)]

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use minijinja::Environment;

mod utils;

const TEMPLATE: &str = include_str!("template_minijinja.jinja");

fn minijinja_benchmark(c: &mut Criterion) {
    let mut env = Environment::new();
    env.add_template("profile", TEMPLATE).unwrap();

    let contexts = utils::generate_random_contexts(100);
    utils::print_binary_size();

    let mut group = c.benchmark_group("Template Parsing");
    group.bench_function("minijinja_parse", |b| {
        b.iter(|| {
            let mut env = Environment::new();
            env.add_template("profile", black_box(TEMPLATE)).unwrap();
            black_box(env);
        });
    });
    group.finish();

    let mut group = c.benchmark_group("Template Rendering");
    group.sample_size(50);
    group.bench_function("minijinja_render", |b| {
        let template = env.get_template("profile").unwrap();
        b.iter(|| {
            for context in &contexts {
                black_box(template.render(context).unwrap());
            }
        });
    });
    group.finish();
}

criterion_group!(benches, minijinja_benchmark);
criterion_main!(benches);
