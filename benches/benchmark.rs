use criterion::{black_box, criterion_group, criterion_main, Criterion};
use cortex_expressions::{AccessContext, ExpressionEngine, Value};
use serde_json::json;

fn literal() -> serde_json::Value {
    json!({
        "$let": {
            "vars": {"base": "$$ROOT.created"},
            "in": {
                "due": {"$moment": ["$$base", {"add": [30, "days"]}, {"format": ["YYYY-MM-DD"]}]},
                "total": {"$intl": ["$$ROOT.total", {"NumberFormat": ["de-DE", {"style": "currency", "currency": "EUR"}]}]},
                "items": ["$$ROOT.items.0", "$$ROOT.items.length", "$$NOW"]
            }
        }
    })
}

fn bench_parse(c: &mut Criterion) {
    let engine = ExpressionEngine::new();
    let literal = literal();
    c.bench_function("parse invoice expression", |b| {
        b.iter(|| engine.parse(black_box(&literal)).unwrap())
    });
}

fn bench_evaluate(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let engine = ExpressionEngine::new();
    let root = engine.parse(&literal()).unwrap();
    let document = Value::from(json!({
        "created": "2024-02-01T00:00:00Z",
        "total": 1234.5,
        "items": ["a", "b", "c"]
    }));

    c.bench_function("evaluate invoice expression", |b| {
        b.iter(|| {
            runtime
                .block_on(engine.evaluate(
                    &root,
                    AccessContext::default(),
                    document.clone(),
                    std::iter::empty(),
                ))
                .unwrap()
        })
    });
}

// ベンチマークグループの定義
criterion_group!(benches, bench_parse, bench_evaluate);
criterion_main!(benches);
