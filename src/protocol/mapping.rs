use super::anthropic::{
    AnthropicContentBlock, AnthropicImageSource, AnthropicMessageContent, AnthropicRequest,
    AnthropicRequestBlock, AnthropicResponse, AnthropicSystem, AnthropicToolChoice, AnthropicUsage,
};
use super::openai_chat::{
    OpenAiChatRequest, OpenAiChatResponse, OpenAiContent, OpenAiContentPart, OpenAiImageUrl,
    OpenAiMessage, OpenAiStreamOptions, OpenAiTool, OpenAiToolCall, OpenAiToolCallFunction,
    OpenAiToolChoice, OpenAiToolChoiceFunction, OpenAiToolChoiceFunctionCall, OpenAiToolFunction,
};
use crate::error::BridgeError;
use crate::observability::token_counter::estimate_output_tokens;

// ---------------------------------------------------------------------------
// Stop reason mappings
// ---------------------------------------------------------------------------

/// Outgoing stop reason for a finished turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

impl StopReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::EndTurn => "end_turn",
            StopReason::ToolUse => "tool_use",
            StopReason::MaxTokens => "max_tokens",
        }
    }
}

#[must_use]
pub fn openai_finish_to_stop_reason(s: &str) -> StopReason {
    match s {
        "tool_calls" | "function_call" => StopReason::ToolUse,
        "length" => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

#[must_use]
pub fn tool_choice_to_openai(choice: &AnthropicToolChoice) -> OpenAiToolChoice {
    match choice {
        AnthropicToolChoice::Auto => OpenAiToolChoice::Mode("auto".to_string()),
        AnthropicToolChoice::Any => OpenAiToolChoice::Mode("required".to_string()),
        AnthropicToolChoice::None => OpenAiToolChoice::Mode("none".to_string()),
        AnthropicToolChoice::Tool { name } => {
            OpenAiToolChoice::Function(OpenAiToolChoiceFunctionCall {
                type_: "function".to_string(),
                function: OpenAiToolChoiceFunction { name: name.clone() },
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Request: messages API -> chat completions
// ---------------------------------------------------------------------------

/// Map a messages-API request onto an equivalent chat-completions request.
///
/// # Errors
///
/// Returns [`BridgeError::InvalidRequest`] when a message uses an unsupported
/// role or a block that cannot appear in that role.
pub fn anthropic_to_openai_request(
    request: &AnthropicRequest,
) -> Result<OpenAiChatRequest, BridgeError> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = request.system.as_ref() {
        let text = system_text(system);
        if !text.is_empty() {
            messages.push(text_message("system", text));
        }
    }

    for message in &request.messages {
        match message.role.as_str() {
            "user" => push_user_message(&message.content, &mut messages)?,
            "assistant" => push_assistant_message(&message.content, &mut messages)?,
            other => {
                return Err(BridgeError::InvalidRequest(format!(
                    "unsupported message role '{other}'"
                )));
            }
        }
    }

    let tools = request.tools.as_ref().filter(|t| !t.is_empty()).map(|tools| {
        tools
            .iter()
            .map(|tool| OpenAiTool {
                type_: "function".to_string(),
                function: OpenAiToolFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: Some(tool.input_schema.clone()),
                },
            })
            .collect()
    });

    let stream = request.stream.unwrap_or(false);
    Ok(OpenAiChatRequest {
        model: request.model.clone(),
        messages,
        tools,
        tool_choice: request.tool_choice.as_ref().map(tool_choice_to_openai),
        stream: Some(stream),
        stream_options: stream.then_some(OpenAiStreamOptions {
            include_usage: Some(true),
        }),
        temperature: request.temperature,
        max_tokens: Some(request.max_tokens),
        top_p: request.top_p,
        stop: request.stop_sequences.clone().filter(|s| !s.is_empty()),
    })
}

fn system_text(system: &AnthropicSystem) -> String {
    match system {
        AnthropicSystem::Text(text) => text.clone(),
        AnthropicSystem::Blocks(blocks) => blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn text_message(role: &str, text: String) -> OpenAiMessage {
    OpenAiMessage {
        role: role.to_string(),
        content: Some(OpenAiContent::Text(text)),
        tool_calls: None,
        tool_call_id: None,
    }
}

fn image_url(source: &AnthropicImageSource) -> String {
    match source {
        AnthropicImageSource::Base64 { media_type, data } => {
            format!("data:{media_type};base64,{data}")
        }
        AnthropicImageSource::Url { url } => url.clone(),
    }
}

/// Flatten a `tool_result` content value (string or block list) to text.
fn tool_result_text(content: Option<&serde_json::Value>) -> String {
    match content {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(text)) => text.clone(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item.get("type").and_then(|t| t.as_str()) {
                Some("text") => item.get("text").and_then(|t| t.as_str()).map(str::to_owned),
                _ => Some(item.to_string()),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
    }
}

fn push_user_message(
    content: &AnthropicMessageContent,
    out: &mut Vec<OpenAiMessage>,
) -> Result<(), BridgeError> {
    let blocks = match content {
        AnthropicMessageContent::Text(text) => {
            out.push(text_message("user", text.clone()));
            return Ok(());
        }
        AnthropicMessageContent::Blocks(blocks) => blocks,
    };

    let mut parts: Vec<OpenAiContentPart> = Vec::new();
    for block in blocks {
        match block {
            AnthropicRequestBlock::Text { text } => {
                parts.push(OpenAiContentPart::Text { text: text.clone() });
            }
            AnthropicRequestBlock::Image { source } => parts.push(OpenAiContentPart::ImageUrl {
                image_url: OpenAiImageUrl {
                    url: image_url(source),
                },
            }),
            AnthropicRequestBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                // Tool results must directly follow the assistant tool calls.
                let mut text = tool_result_text(content.as_ref());
                if is_error.unwrap_or(false) {
                    text.insert_str(0, "Error: ");
                }
                out.push(OpenAiMessage {
                    role: "tool".to_string(),
                    content: Some(OpenAiContent::Text(text)),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                });
            }
            AnthropicRequestBlock::Thinking { .. } | AnthropicRequestBlock::RedactedThinking { .. } => {}
            AnthropicRequestBlock::ToolUse { .. } => {
                return Err(BridgeError::InvalidRequest(
                    "tool_use blocks are only valid in assistant messages".to_string(),
                ));
            }
        }
    }

    if parts.is_empty() {
        return Ok(());
    }
    let content = match parts.as_slice() {
        [OpenAiContentPart::Text { text }] => OpenAiContent::Text(text.clone()),
        _ => OpenAiContent::Parts(parts),
    };
    out.push(OpenAiMessage {
        role: "user".to_string(),
        content: Some(content),
        tool_calls: None,
        tool_call_id: None,
    });
    Ok(())
}

fn push_assistant_message(
    content: &AnthropicMessageContent,
    out: &mut Vec<OpenAiMessage>,
) -> Result<(), BridgeError> {
    let blocks = match content {
        AnthropicMessageContent::Text(text) => {
            out.push(text_message("assistant", text.clone()));
            return Ok(());
        }
        AnthropicMessageContent::Blocks(blocks) => blocks,
    };

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block {
            AnthropicRequestBlock::Text { text: t } => text.push_str(t),
            AnthropicRequestBlock::ToolUse { id, name, input } => {
                let arguments = serde_json::to_string(input)
                    .map_err(|e| BridgeError::InvalidRequest(format!("tool_use input: {e}")))?;
                tool_calls.push(OpenAiToolCall {
                    id: id.clone(),
                    type_: "function".to_string(),
                    function: OpenAiToolCallFunction {
                        name: name.clone(),
                        arguments,
                    },
                });
            }
            AnthropicRequestBlock::Thinking { .. } | AnthropicRequestBlock::RedactedThinking { .. } => {}
            AnthropicRequestBlock::Image { .. } | AnthropicRequestBlock::ToolResult { .. } => {
                return Err(BridgeError::InvalidRequest(
                    "assistant messages may only contain text, thinking and tool_use blocks"
                        .to_string(),
                ));
            }
        }
    }

    if text.is_empty() && tool_calls.is_empty() {
        return Ok(());
    }
    out.push(OpenAiMessage {
        role: "assistant".to_string(),
        content: (!text.is_empty()).then_some(OpenAiContent::Text(text)),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    });
    Ok(())
}

// ---------------------------------------------------------------------------
// Response: chat completions -> messages API
// ---------------------------------------------------------------------------

/// Map a one-shot chat-completions response to a messages-API response.
#[must_use]
pub fn openai_to_anthropic_response(
    response: OpenAiChatResponse,
    model: &str,
    message_id: String,
) -> AnthropicResponse {
    let mut content = Vec::new();
    let mut stop_reason = StopReason::EndTurn;
    let mut produced_text = String::new();

    if let Some(choice) = response.choices.into_iter().next() {
        let message = choice.message;
        let reasoning = message
            .reasoning
            .filter(|r| !r.is_empty())
            .or(message.reasoning_content.filter(|r| !r.is_empty()));
        if let Some(thinking) = reasoning {
            produced_text.push_str(&thinking);
            content.push(AnthropicContentBlock::Thinking { thinking });
        }
        if let Some(text) = message.content.filter(|t| !t.is_empty()) {
            produced_text.push_str(&text);
            content.push(AnthropicContentBlock::Text { text });
        }
        for call in message.tool_calls.unwrap_or_default() {
            let input = parse_tool_arguments(&call.function.name, &call.function.arguments);
            content.push(AnthropicContentBlock::ToolUse {
                id: call.id,
                name: call.function.name,
                input,
            });
        }
        if let Some(reason) = choice.finish_reason.as_deref() {
            stop_reason = openai_finish_to_stop_reason(reason);
        }
        if content
            .iter()
            .any(|b| matches!(b, AnthropicContentBlock::ToolUse { .. }))
        {
            stop_reason = StopReason::ToolUse;
        }
    }

    let usage = response.usage.unwrap_or_default();
    AnthropicResponse {
        id: message_id,
        type_: "message".to_string(),
        role: "assistant".to_string(),
        model: model.to_string(),
        content,
        stop_reason: Some(stop_reason.as_str().to_string()),
        stop_sequence: None,
        usage: AnthropicUsage {
            input_tokens: usage.prompt_tokens.unwrap_or(0),
            output_tokens: usage
                .completion_tokens
                .unwrap_or_else(|| estimate_output_tokens(&produced_text)),
        },
    }
}

fn parse_tool_arguments(name: &str, arguments: &str) -> serde_json::Value {
    if arguments.trim().is_empty() {
        return serde_json::Value::Object(serde_json::Map::new());
    }
    match serde_json::from_str::<serde_json::Value>(arguments) {
        Ok(value @ serde_json::Value::Object(_)) => value,
        Ok(_) | Err(_) => {
            tracing::warn!(tool = name, "tool call arguments are not a JSON object; using {{}}");
            serde_json::Value::Object(serde_json::Map::new())
        }
    }
}
