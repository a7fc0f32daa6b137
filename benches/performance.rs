use a2ui_adapter::{ServerEvent, StreamParser};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// Build `count` server events for one text block: a `content_block_start`,
/// `count` `content_block_delta`s of `chunk_size` characters each, and a
/// `content_block_stop`.
fn text_block_events(count: usize, chunk_size: usize) -> Vec<ServerEvent> {
    let chunk = "a".repeat(chunk_size);
    let mut events = vec![serde_json::from_str(
        r#"{"type":"content_block_start","index":0,"contentBlock":{"type":"text"}}"#,
    )
    .unwrap()];

    for _ in 0..count {
        let delta = serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": chunk},
        });
        events.push(serde_json::from_value(delta).unwrap());
    }

    events.push(serde_json::from_str(r#"{"type":"content_block_stop","index":0}"#).unwrap());
    events
}

/// Build a tool-use block emitting `fragment_count` partial_json fragments
/// that together assemble a single `begin_rendering` call.
fn tool_use_events(fragment_count: usize) -> Vec<ServerEvent> {
    let body = serde_json::json!({
        "surfaceId": "main",
        "root": {"id": "root", "component": "Column", "children": []},
    })
    .to_string();
    let fragment_len = body.len().div_ceil(fragment_count.max(1));

    let mut events = vec![serde_json::from_str(
        r#"{"type":"content_block_start","index":0,"contentBlock":{"type":"tool_use","name":"begin_rendering"}}"#,
    )
    .unwrap()];

    for chunk in body.as_bytes().chunks(fragment_len.max(1)) {
        let partial = std::str::from_utf8(chunk).unwrap();
        let delta = serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "input_json_delta", "partial_json": partial},
        });
        events.push(serde_json::from_value(delta).unwrap());
    }

    events.push(serde_json::from_str(r#"{"type":"content_block_stop","index":0}"#).unwrap());
    events.push(serde_json::from_str(r#"{"type":"message_stop"}"#).unwrap());
    events
}

fn bench_text_block_by_delta_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("text_block_by_delta_count");

    for count in [1, 10, 100, 1000].iter() {
        let events = text_block_events(*count, 32);
        group.bench_with_input(BenchmarkId::from_parameter(count), &events, |b, events| {
            b.iter(|| {
                let mut parser = StreamParser::new();
                for event in black_box(events).iter() {
                    black_box(parser.process(event.clone()));
                }
            });
        });
    }

    group.finish();
}

fn bench_text_block_by_chunk_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("text_block_by_chunk_size");

    for size in [8, 64, 512, 4096].iter() {
        let events = text_block_events(50, *size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &events, |b, events| {
            b.iter(|| {
                let mut parser = StreamParser::new();
                for event in black_box(events).iter() {
                    black_box(parser.process(event.clone()));
                }
            });
        });
    }

    group.finish();
}

fn bench_tool_use_assembly_by_fragment_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("tool_use_assembly_by_fragment_count");

    for count in [1, 5, 20, 100].iter() {
        let events = tool_use_events(*count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &events, |b, events| {
            b.iter(|| {
                let mut parser = StreamParser::new();
                for event in black_box(events).iter() {
                    black_box(parser.process(event.clone()));
                }
            });
        });
    }

    group.finish();
}

/// Many concurrently open blocks, as a tool-heavy turn might produce
/// before any of them close.
fn bench_many_concurrent_blocks(c: &mut Criterion) {
    let mut group = c.benchmark_group("many_concurrent_blocks");

    for block_count in [5, 20, 50].iter() {
        let mut events = Vec::new();
        for index in 0..*block_count {
            let start = serde_json::json!({
                "type": "content_block_start",
                "index": index,
                "contentBlock": {"type": "text"},
            });
            events.push(serde_json::from_value::<ServerEvent>(start).unwrap());
        }
        for index in 0..*block_count {
            let delta = serde_json::json!({
                "type": "content_block_delta",
                "index": index,
                "delta": {"type": "text_delta", "text": "chunk"},
            });
            events.push(serde_json::from_value::<ServerEvent>(delta).unwrap());
        }
        for index in 0..*block_count {
            let stop = serde_json::json!({"type": "content_block_stop", "index": index});
            events.push(serde_json::from_value::<ServerEvent>(stop).unwrap());
        }

        group.bench_with_input(
            BenchmarkId::from_parameter(block_count),
            &events,
            |b, events| {
                b.iter(|| {
                    let mut parser = StreamParser::new();
                    for event in black_box(events).iter() {
                        black_box(parser.process(event.clone()));
                    }
                });
            },
        );
    }

    group.finish();
}

/// Server events carry their own content-block index; shift it so
/// sequential blocks in a synthetic turn don't collide.
fn reindex(event: ServerEvent, index: u64) -> ServerEvent {
    match event {
        ServerEvent::ContentBlockStart { content_block, .. } => {
            ServerEvent::ContentBlockStart { index, content_block }
        }
        ServerEvent::ContentBlockDelta { delta, .. } => {
            ServerEvent::ContentBlockDelta { index, delta }
        }
        ServerEvent::ContentBlockStop { .. } => ServerEvent::ContentBlockStop { index },
        other => other,
    }
}

/// Realistic end-to-end turn: a thinking block, a text block, then a
/// tool-use block, terminated by `message_stop`.
fn bench_realistic_turn(c: &mut Criterion) {
    let mut group = c.benchmark_group("realistic_turn");

    let mut events = vec![serde_json::from_str::<ServerEvent>(
        r#"{"type":"content_block_start","index":0,"contentBlock":{"type":"thinking"}}"#,
    )
    .unwrap()];
    for _ in 0..5 {
        let delta = serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "thinking_delta", "thinking": "reasoning step"},
        });
        events.push(serde_json::from_value(delta).unwrap());
    }
    events.push(serde_json::from_str(r#"{"type":"content_block_stop","index":0}"#).unwrap());
    events.extend(text_block_events(20, 64).into_iter().map(|e| reindex(e, 1)));
    events.extend(tool_use_events(10).into_iter().map(|e| reindex(e, 2)));

    group.bench_function("thinking_text_tool_use", |b| {
        b.iter(|| {
            let mut parser = StreamParser::new();
            for event in black_box(&events).iter() {
                black_box(parser.process(event.clone()));
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_text_block_by_delta_count,
    bench_text_block_by_chunk_size,
    bench_tool_use_assembly_by_fragment_count,
    bench_many_concurrent_blocks,
    bench_realistic_turn,
);
criterion_main!(benches);
