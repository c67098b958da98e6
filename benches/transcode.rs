use std::convert::Infallible;

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use msgbridge::protocol::anthropic::AnthropicRequest;
use msgbridge::protocol::mapping::anthropic_to_openai_request;
use msgbridge::stream::{MemorySink, StreamOrchestrator, StreamSettings};

fn text_stream(deltas: usize) -> Vec<u8> {
    let mut out = String::new();
    out.push_str("data: {\"choices\":[{\"index\":0,\"delta\":{\"reasoning_content\":\"Planning the reply.\"}}]}\n\n");
    for i in 0..deltas {
        out.push_str("data: {\"id\":\"chatcmpl-1\",\"object\":\"chat.completion.chunk\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"token ");
        out.push_str(&i.to_string());
        out.push_str(" \"}}]}\n\n");
    }
    out.push_str("data: {\"choices\":[],\"usage\":{\"prompt_tokens\":120,\"completion_tokens\":");
    out.push_str(&(deltas * 2).to_string());
    out.push_str("}}\n\ndata: [DONE]\n\n");
    out.into_bytes()
}

fn tool_stream(fragments: usize) -> Vec<u8> {
    let mut out = String::from(
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"type\":\"function\",\"function\":{\"name\":\"write_file\",\"arguments\":\"\"}}]}}]}\n\n",
    );
    let mut cumulative = String::from("{\"content\":\"");
    for i in 0..fragments {
        cumulative.push_str("line ");
        cumulative.push_str(&i.to_string());
        cumulative.push_str("\\n");
        let escaped = serde_json::to_string(&cumulative).unwrap_or_default();
        out.push_str("data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":");
        out.push_str(&escaped);
        out.push_str("}}]}}]}\n\n");
    }
    out.push_str("data: [DONE]\n\n");
    out.into_bytes()
}

/// Split `stream` into fixed-size chunks so lines straddle chunk boundaries.
fn chunked(stream: &[u8], size: usize) -> Vec<Bytes> {
    stream
        .chunks(size)
        .map(Bytes::copy_from_slice)
        .collect()
}

fn run_once(runtime: &tokio::runtime::Runtime, chunks: &[Bytes], settings: &StreamSettings) -> usize {
    runtime.block_on(async {
        let body = futures_util::stream::iter(chunks.iter().cloned().map(Ok::<_, Infallible>));
        let mut orchestrator =
            StreamOrchestrator::new(MemorySink::new(), "bench-model", "msg_bench", settings);
        let _ = orchestrator.run(body).await;
        orchestrator.into_sink().frames().len()
    })
}

fn bench_transcode(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap_or_else(|e| panic!("bench runtime: {e}"));
    let settings = StreamSettings::default();

    let text = text_stream(500);
    let text_whole = vec![Bytes::from(text.clone())];
    let text_small_chunks = chunked(&text, 61);
    let tools = chunked(&tool_stream(200), 512);

    c.bench_function("transcode_text_500_single_chunk", |b| {
        b.iter(|| black_box(run_once(&runtime, black_box(&text_whole), &settings)));
    });

    c.bench_function("transcode_text_500_61b_chunks", |b| {
        b.iter(|| black_box(run_once(&runtime, black_box(&text_small_chunks), &settings)));
    });

    c.bench_function("transcode_cumulative_tool_args_200", |b| {
        b.iter(|| black_box(run_once(&runtime, black_box(&tools), &settings)));
    });

    let request: AnthropicRequest = serde_json::from_value(serde_json::json!({
        "model": "bench-model",
        "max_tokens": 1024,
        "stream": true,
        "system": "You are a helpful assistant",
        "tools": [{"name": "get_weather", "input_schema": {"type": "object"}}],
        "messages": [
            {"role": "user", "content": "What is the weather in SF?"},
            {"role": "assistant", "content": [
                {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "SF"}}
            ]},
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "18C and sunny"}
            ]}
        ]
    }))
    .unwrap_or_else(|e| panic!("bench request: {e}"));

    c.bench_function("map_request_tool_turn", |b| {
        b.iter(|| black_box(anthropic_to_openai_request(black_box(&request))));
    });
}

criterion_group!(benches, bench_transcode);
criterion_main!(benches);
