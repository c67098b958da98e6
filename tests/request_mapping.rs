use msgbridge::error::{format_error, BridgeError};
use msgbridge::protocol::anthropic::AnthropicRequest;
use msgbridge::protocol::mapping::{anthropic_to_openai_request, openai_to_anthropic_response};
use msgbridge::protocol::openai_chat::OpenAiChatResponse;
use serde_json::{json, Value};

fn map_request(value: Value) -> Result<Value, BridgeError> {
    let request: AnthropicRequest = serde_json::from_value(value).expect("request json");
    let mapped = anthropic_to_openai_request(&request)?;
    Ok(serde_json::to_value(mapped).expect("serialize"))
}

#[test]
fn test_agent_turn_maps_to_chat_messages() {
    let out = map_request(json!({
        "model": "claude-test",
        "max_tokens": 256,
        "stream": true,
        "system": [{"type": "text", "text": "You are terse."}, {"type": "text", "text": "Use tools."}],
        "tools": [{
            "name": "get_weather",
            "description": "Weather lookup",
            "input_schema": {"type": "object", "properties": {"city": {"type": "string"}}}
        }],
        "tool_choice": {"type": "any"},
        "messages": [
            {"role": "user", "content": "Weather in SF?"},
            {"role": "assistant", "content": [
                {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "SF"}}
            ]},
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": [{"type": "text", "text": "18C"}]},
                {"type": "text", "text": "Thanks"}
            ]}
        ]
    }))
    .expect("maps");

    assert_eq!(out["model"], "claude-test");
    assert_eq!(out["max_tokens"], 256);
    assert_eq!(out["stream"], true);
    assert_eq!(out["stream_options"], json!({"include_usage": true}));
    assert_eq!(out["tool_choice"], "required");
    assert_eq!(
        out["tools"][0],
        json!({
            "type": "function",
            "function": {
                "name": "get_weather",
                "description": "Weather lookup",
                "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}
            }
        })
    );

    let messages = out["messages"].as_array().expect("messages");
    let roles: Vec<&str> = messages
        .iter()
        .filter_map(|m| m["role"].as_str())
        .collect();
    assert_eq!(roles, ["system", "user", "assistant", "tool", "user"]);
    assert_eq!(messages[0]["content"], "You are terse.\nUse tools.");
    assert_eq!(messages[2]["tool_calls"][0]["id"], "toolu_1");
    assert_eq!(
        messages[2]["tool_calls"][0]["function"]["arguments"],
        "{\"city\":\"SF\"}"
    );
    assert_eq!(messages[3]["tool_call_id"], "toolu_1");
    assert_eq!(messages[3]["content"], "18C");
    assert_eq!(messages[4]["content"], "Thanks");
}

#[test]
fn test_named_tool_choice_and_error_tool_result() {
    let out = map_request(json!({
        "model": "m",
        "max_tokens": 8,
        "tool_choice": {"type": "tool", "name": "lookup"},
        "messages": [
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "t1", "content": "not found", "is_error": true}
            ]}
        ]
    }))
    .expect("maps");
    assert_eq!(
        out["tool_choice"],
        json!({"type": "function", "function": {"name": "lookup"}})
    );
    assert_eq!(out["messages"][0]["content"], "Error: not found");
    assert!(out.get("stream_options").is_none());
}

#[test]
fn test_base64_image_becomes_data_url() {
    let out = map_request(json!({
        "model": "m",
        "max_tokens": 8,
        "messages": [{"role": "user", "content": [
            {"type": "text", "text": "what is this"},
            {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AAAA"}}
        ]}]
    }))
    .expect("maps");
    let parts = out["messages"][0]["content"].as_array().expect("parts");
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AAAA");
}

#[test]
fn test_unsupported_role_is_invalid_request() {
    let err = map_request(json!({
        "model": "m",
        "max_tokens": 8,
        "messages": [{"role": "system", "content": "nope"}]
    }))
    .expect_err("role rejected");
    let (status, body) = format_error(&err);
    assert_eq!(status, http::StatusCode::BAD_REQUEST);
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[test]
fn test_one_shot_response_with_reasoning_and_tools() {
    let response: OpenAiChatResponse = serde_json::from_value(json!({
        "id": "chatcmpl-1",
        "choices": [{
            "index": 0,
            "finish_reason": "tool_calls",
            "message": {
                "role": "assistant",
                "reasoning_content": "look it up",
                "content": "One moment.",
                "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "get_weather", "arguments": "{\"city\":\"SF\"}"}},
                    {"id": "call_2", "type": "function", "function": {"name": "broken", "arguments": "{\"city\":"}}
                ]
            }
        }],
        "usage": {"prompt_tokens": 12, "completion_tokens": 7}
    }))
    .expect("response json");

    let mapped = openai_to_anthropic_response(response, "claude-test", "msg_1".to_string());
    let out = serde_json::to_value(mapped).expect("serialize");
    assert_eq!(out["id"], "msg_1");
    assert_eq!(out["type"], "message");
    assert_eq!(out["model"], "claude-test");
    assert_eq!(out["stop_reason"], "tool_use");
    assert_eq!(out["usage"], json!({"input_tokens": 12, "output_tokens": 7}));

    let kinds: Vec<&str> = out["content"]
        .as_array()
        .expect("content")
        .iter()
        .filter_map(|b| b["type"].as_str())
        .collect();
    assert_eq!(kinds, ["thinking", "text", "tool_use", "tool_use"]);
    assert_eq!(out["content"][2]["input"], json!({"city": "SF"}));
    assert_eq!(out["content"][3]["input"], json!({}));
}

#[test]
fn test_one_shot_response_estimates_missing_usage() {
    let response: OpenAiChatResponse = serde_json::from_value(json!({
        "choices": [{"message": {"content": "three short words"}, "finish_reason": "length"}]
    }))
    .expect("response json");
    let mapped = openai_to_anthropic_response(response, "m", "msg_2".to_string());
    assert_eq!(mapped.stop_reason.as_deref(), Some("max_tokens"));
    assert_eq!(mapped.usage.output_tokens, 3);
    assert_eq!(mapped.usage.input_tokens, 0);
}
