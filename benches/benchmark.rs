use criterion::{black_box, criterion_group, criterion_main, Criterion};
use prompty::{value::to_data, Engine, RenderContext};
use serde_json::json;

const TEMPLATE: &str = r#"{~prompty.message role="system"~}
You are {~prompty.var name="assistant.name" default="an assistant" /~}.
{~prompty.if eval="len(rules) > 0"~}Rules:
{~prompty.for item="rule" index="i" in="rules" limit="20"~}{~prompty.var name="i" /~}. {~prompty.var name="rule" /~}
{~/prompty.for~}{~/prompty.if~}
{~/prompty.message~}
{~prompty.message role="user"~}{~prompty.switch eval="lang"~}{~prompty.case value="ja"~}こんにちは{~/prompty.case~}{~prompty.casedefault~}Hello{~/prompty.casedefault~}{~/prompty.switch~}, {~prompty.var name="question" /~}{~/prompty.message~}
"#;

fn bench_parse(c: &mut Criterion) {
    let engine = Engine::default();
    c.bench_function("parse chat template", |b| {
        b.iter(|| engine.parse(black_box(TEMPLATE)).unwrap())
    });
}

fn bench_render(c: &mut Criterion) {
    let engine = Engine::default();
    let template = engine.parse(TEMPLATE).unwrap();
    let rules: Vec<String> = (0..20).map(|i| format!("rule number {}", i)).collect();
    let data = to_data(json!({
        "assistant": {"name": "Prompty"},
        "rules": rules,
        "lang": "en",
        "question": "what is a template engine?"
    }));
    let ctx = RenderContext::new();

    c.bench_function("render chat template", |b| {
        b.iter(|| template.execute(&ctx, black_box(&data)).unwrap())
    });
    c.bench_function("render chat messages", |b| {
        b.iter(|| template.execute_messages(&ctx, black_box(&data)).unwrap())
    });
}

// ベンチマークグループの定義
criterion_group!(benches, bench_parse, bench_render);
criterion_main!(benches);
