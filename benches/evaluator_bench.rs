//! Criterion benchmarks for the jqlite evaluator.
//!
//! `run` cases measure raw evaluation on already parsed values: no JSON
//! parsing and no rendering. The `end_to_end` group goes through
//! `evaluate`, text in and text out.
//!
//! Run:
//!   cargo bench
//!   cargo bench -- simple_path        # one group
//!   cargo bench -- realistic_workload # one group

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use indexmap::IndexMap;
use jqlite::{evaluate, CompiledFilter, FilterOptions, JValue};

// ── Data builders ─────────────────────────────────────────────────────────────

/// Flat array of numbers: [0, 1, ..., n-1].
fn numeric_array(n: usize) -> JValue {
    (0..n).map(|i| JValue::from(i as f64)).collect()
}

/// Full e-commerce dataset: 100 products.
///
/// Each product: {id, name, category, price, inStock, rating, reviews, tags, vendor}.
fn ecommerce_100() -> JValue {
    let categories = ["Electronics", "Clothing", "Books", "Home"];
    let products: Vec<JValue> = (0..100_usize)
        .map(|i| {
            let tags: Vec<JValue> = (0..i % 5)
                .map(|j| JValue::string(format!("tag{j}")))
                .collect();

            let mut vendor = IndexMap::new();
            vendor.insert("name".to_string(), JValue::string(format!("Vendor {}", i % 10)));
            vendor.insert("rating".to_string(), JValue::from(4.0 + (i % 5) as f64 * 0.2));

            let mut p = IndexMap::new();
            p.insert("id".to_string(), JValue::from(i as f64));
            p.insert("name".to_string(), JValue::string(format!("Product {i}")));
            p.insert("category".to_string(), JValue::string(categories[i % 4]));
            p.insert("price".to_string(), JValue::from(10.0 + i as f64 * 5.5));
            p.insert("inStock".to_string(), JValue::Bool(i % 3 != 0));
            p.insert("rating".to_string(), JValue::from(3.0 + (i % 3) as f64 * 0.5));
            p.insert("reviews".to_string(), JValue::from((i * 2) as f64));
            p.insert("tags".to_string(), JValue::array(tags));
            p.insert("vendor".to_string(), JValue::object(vendor));
            JValue::object(p)
        })
        .collect();

    let mut root = IndexMap::new();
    root.insert("products".to_string(), JValue::array(products));
    JValue::object(root)
}

// ── Helper: run a filter to completion ────────────────────────────────────────

#[inline]
fn run_all(filter: &CompiledFilter, data: &JValue) -> usize {
    filter.run(data.clone()).map(|r| r.unwrap()).count()
}

fn compiled(src: &str) -> CompiledFilter {
    CompiledFilter::compile(src).unwrap()
}

// ── Bench groups ──────────────────────────────────────────────────────────────

fn bench_simple_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("simple_path");
    group.sample_size(300);

    let cases: &[(&str, &str, &str)] = &[
        ("field", ".name", r#"{"name":"Alice","age":30}"#),
        ("deep_path_5", ".a.b.c.d.e", r#"{"a":{"b":{"c":{"d":{"e":42}}}}}"#),
        ("arithmetic", ".price * .quantity", r#"{"price":10.5,"quantity":3}"#),
        ("optional_miss", ".a?.b?.c?", r#"{"a":1}"#),
    ];
    for (name, src, json) in cases {
        let filter = compiled(src);
        let data = JValue::from_json_str(json).unwrap();
        group.bench_function(*name, |b| {
            b.iter(|| black_box(run_all(black_box(&filter), black_box(&data))))
        });
    }

    group.finish();
}

fn bench_array_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("array_operations");

    for n in [100_usize, 1000, 10000] {
        let data = numeric_array(n);
        let sum = compiled("add");
        let max = compiled("max");
        let iterate = compiled(".[] | select(. % 2 == 0)");
        let sort = compiled("sort_by(-.)");
        group.bench_with_input(BenchmarkId::new("add", n), &data, |b, d| {
            b.iter(|| black_box(run_all(&sum, d)))
        });
        group.bench_with_input(BenchmarkId::new("max", n), &data, |b, d| {
            b.iter(|| black_box(run_all(&max, d)))
        });
        group.bench_with_input(BenchmarkId::new("iterate_select", n), &data, |b, d| {
            b.iter(|| black_box(run_all(&iterate, d)))
        });
        group.bench_with_input(BenchmarkId::new("sort_by", n), &data, |b, d| {
            b.iter(|| black_box(run_all(&sort, d)))
        });
    }

    group.finish();
}

fn bench_generators(c: &mut Criterion) {
    let mut group = c.benchmark_group("generators");

    let cases: &[(&str, &str)] = &[
        ("reduce_range_10k", "reduce range(10000) as $i (0; . + $i)"),
        ("foreach_range_10k", "[foreach range(10000) as $i (0; . + $i)] | length"),
        ("limit_infinite", "[limit(1000; repeat(. + 1))] | length"),
        ("first_of_infinite", "first(range(infinite) | select(. > 5000))"),
        ("recursive_fn", "def f: if . < 2 then . else (. - 1 | f) + (. - 2 | f) end; 15 | f"),
    ];
    for (name, src) in cases {
        let filter = compiled(src);
        let data = JValue::from(0i64);
        group.bench_function(*name, |b| b.iter(|| black_box(run_all(&filter, &data))));
    }

    group.finish();
}

fn bench_string_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("string_operations");
    let data = JValue::from_json_str(r#"{"s":"The quick brown fox jumps over the lazy dog","csv":"a,b,c,d,e,f"}"#)
        .unwrap();

    let cases: &[(&str, &str)] = &[
        ("interpolation", r#""[\(.s | length)] \(.s)""#),
        ("split_join", r#".csv | split(",") | join("-")"#),
        ("ascii_upcase", ".s | ascii_upcase"),
        ("test_regex", r#".s | test("f[aeiou]x")"#),
        ("gsub", r#".s | gsub("o"; "0")"#),
        ("format_csv", ".csv | split(\",\") | @csv"),
    ];
    for (name, src) in cases {
        let filter = compiled(src);
        group.bench_function(*name, |b| b.iter(|| black_box(run_all(&filter, &data))));
    }

    group.finish();
}

fn bench_realistic_workload(c: &mut Criterion) {
    let mut group = c.benchmark_group("realistic_workload");
    let data = ecommerce_100();

    let cases: &[(&str, &str)] = &[
        ("filter_by_category", r#"[.products[] | select(.category == "Electronics")]"#),
        ("price_stats", "[.products[].price] | {min: min, max: max, total: add}"),
        ("group_by_category", "[.products | group_by(.category)[] | {key: .[0].category, count: length}]"),
        ("top_rated", "[.products | sort_by(-.rating, .price)[:5][] | .name]"),
        ("update_prices", ".products[].price |= . * 1.1"),
        ("paths_of_numbers", "[paths(type == \"number\")] | length"),
        ("to_entries_roundtrip", ".products[0] | to_entries | from_entries"),
    ];
    for (name, src) in cases {
        let filter = compiled(src);
        group.bench_function(*name, |b| b.iter(|| black_box(run_all(&filter, &data))));
    }

    group.finish();
}

fn bench_end_to_end(c: &mut Criterion) {
    let mut group = c.benchmark_group("end_to_end");
    let json = ecommerce_100().to_json_string().unwrap();
    let all = FilterOptions::default().with_all_outputs(true);
    let pretty = FilterOptions::default().with_compact_output(false).with_sort_keys(true);

    group.bench_function("identity_compact", |b| {
        b.iter(|| black_box(evaluate(black_box(&json), ".", &FilterOptions::default()).unwrap()))
    });
    group.bench_function("identity_pretty_sorted", |b| {
        b.iter(|| black_box(evaluate(black_box(&json), ".", &pretty).unwrap()))
    });
    group.bench_function("all_names", |b| {
        b.iter(|| black_box(evaluate(black_box(&json), ".products[].name", &all).unwrap()))
    });
    group.bench_function("compile_only", |b| {
        b.iter(|| {
            black_box(CompiledFilter::compile(black_box(
                "def f(g): [.[] | g]; .products | f(select(.inStock) | {name, price}) | sort_by(.price)",
            ))
            .unwrap())
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_simple_paths,
    bench_array_operations,
    bench_generators,
    bench_string_operations,
    bench_realistic_workload,
    bench_end_to_end
);
criterion_main!(benches);
