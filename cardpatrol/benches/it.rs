use cardpatrol::{cardinality, prom::SeriesSample};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

// 10k series of one metric: a high-cardinality request id, a handful of
// methods and status codes, one job.
fn http_requests_series(n: usize) -> Vec<SeriesSample> {
    let methods = ["GET", "POST", "PUT", "DELETE"];
    let codes = ["200", "201", "404", "500", "503"];
    (0..n)
        .map(|i| {
            [
                ("__name__", "http_requests_total".to_string()),
                ("job", "api".to_string()),
                ("method", methods[i % methods.len()].to_string()),
                ("code", codes[i % codes.len()].to_string()),
                ("request_id", format!("req-{i:06}")),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
        })
        .collect()
}

fn bench_select_high_card_label(c: &mut Criterion) {
    let series = http_requests_series(10_000);
    c.bench_function("select_high_card_label", |b| {
        b.iter(|| {
            let hcs = cardinality::select_high_card_label(
                black_box("http_requests_total"),
                black_box(&series),
            );
            black_box(hcs);
        })
    });
}

criterion_group!(benches, bench_select_high_card_label);
criterion_main!(benches);
