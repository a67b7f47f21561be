use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use speechrules::{
    Environment, OriginTag, ProcessContext, Property, PropertyBag, PropertyMatcher, Rule,
    RuleProcessor, RuleRegistry, StaticTypeRegistry, Value,
};

fn make_processor(rules_per_scope: usize) -> RuleProcessor {
    let types = StaticTypeRegistry::new();
    types.register("android.view.View", None);
    types.register("android.widget.TextView", Some("android.view.View"));
    types.register("android.widget.Button", Some("android.widget.TextView"));

    let processor = RuleProcessor::new(
        Arc::new(RuleRegistry::new()),
        Environment::empty().with_types(Arc::new(types)),
    );

    // Seed rules that reject the benchmark event so dispatch walks the whole
    // scope before reaching the fallback rule that matches.
    let mut rules = Vec::with_capacity(rules_per_scope + 1);
    for i in 0..rules_per_scope {
        rules.push(
            Rule::builder()
                .index(i)
                .matcher(Property::PackageName, "com.example.bench")
                .matcher(Property::EventType, "TYPE_VIEW_CLICKED||TYPE_VIEW_LONG_CLICKED")
                .matcher(Property::ItemCount, &format!("> {}", 1000 + i))
                .template("%s")
                .selector("property", "text")
                .build()
                .unwrap(),
        );
    }
    rules.push(
        Rule::builder()
            .index(rules_per_scope)
            .matcher(Property::ClassName, "android.widget.TextView")
            .template("%s, button")
            .selector("property", "text")
            .metadata("queuing", "QUEUE")
            .build()
            .unwrap(),
    );

    processor
        .load(&OriginTag::new("bench").unwrap(), rules)
        .unwrap();
    processor
}

fn bench_event() -> PropertyBag {
    PropertyBag::new()
        .with(Property::EventType, 1)
        .with(Property::PackageName, "com.example.bench")
        .with(Property::ClassName, "android.widget.Button")
        .with(Property::ItemCount, 5)
        .with(Property::Text, "Submit")
}

fn bench_first_match_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    for rules in [8usize, 64, 256] {
        let processor = make_processor(rules);
        let event = bench_event();
        let ctx = ProcessContext::new();
        group.bench_function(format!("scan_{rules}_then_fallback"), |b| {
            b.iter(|| {
                let outcome = processor.process(black_box(&event), &ctx);
                debug_assert_eq!(outcome.utterance.text(), "Submit, button");
                processor.recycle(outcome.utterance);
            });
        });
    }

    group.finish();
}

fn bench_matcher_parse_and_accept(c: &mut Criterion) {
    c.bench_function("matcher/parse_or_and_accept", |b| {
        let candidate = Value::Int(8);
        b.iter(|| {
            let matcher = PropertyMatcher::parse(
                Property::EventType,
                black_box("TYPE_VIEW_CLICKED||TYPE_VIEW_SELECTED||TYPE_VIEW_FOCUSED"),
            );
            black_box(matcher.accepts_value(Some(&candidate)))
        });
    });
}

criterion_group!(benches, bench_first_match_dispatch, bench_matcher_parse_and_accept);
criterion_main!(benches);
