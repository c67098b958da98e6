use std::fmt::Write as _;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::config::ToolArgumentsMode;
use crate::observability::token_counter::resolve_output_tokens;
use crate::protocol::anthropic::{
    AnthropicContentBlock, AnthropicDelta, AnthropicStreamEvent, AnthropicUsage,
};
use crate::protocol::mapping::StopReason;
use crate::protocol::openai_chat::{OpenAiDelta, OpenAiStreamToolCall, OpenAiUsage};
use crate::stream::recovery::preview;
use crate::util::next_call_id;

/// One backend delta, classified once.
///
/// A well-behaved backend sends at most one kind per delta. When several are
/// present, tool calls win over answer text, which wins over reasoning; the
/// losers are logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendDelta {
    Text(String),
    Reasoning(String),
    ToolCalls(Vec<ToolCallFragment>),
    Empty,
}

/// One entry of a `tool_calls` delta array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

impl From<OpenAiStreamToolCall> for ToolCallFragment {
    fn from(call: OpenAiStreamToolCall) -> Self {
        let (name, arguments) = match call.function {
            Some(function) => (function.name, function.arguments),
            None => (None, None),
        };
        Self {
            index: call.index,
            id: call.id,
            name,
            arguments,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

impl From<OpenAiDelta> for BackendDelta {
    fn from(delta: OpenAiDelta) -> Self {
        let tool_calls = delta.tool_calls.filter(|calls| !calls.is_empty());
        let content = non_empty(delta.content);
        let reasoning = non_empty(delta.reasoning).or_else(|| non_empty(delta.reasoning_content));

        if let Some(calls) = tool_calls {
            if content.is_some() || reasoning.is_some() {
                warn!(
                    has_content = content.is_some(),
                    has_reasoning = reasoning.is_some(),
                    "delta carries text alongside tool_calls; text dropped"
                );
            }
            return BackendDelta::ToolCalls(calls.into_iter().map(ToolCallFragment::from).collect());
        }
        if let Some(text) = content {
            if reasoning.is_some() {
                warn!("delta carries reasoning alongside content; reasoning dropped");
            }
            return BackendDelta::Text(text);
        }
        match reasoning {
            Some(reasoning) => BackendDelta::Reasoning(reasoning),
            None => BackendDelta::Empty,
        }
    }
}

#[derive(Debug)]
struct ToolCallState {
    block_index: usize,
    arguments: String,
}

/// What finalization produced besides the block stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub stop_reason: StopReason,
    pub usage: AnthropicUsage,
}

/// Per-request content state: which blocks are open, what was emitted so far
/// and the usage fallback inputs.
///
/// Block indices are handed out in first-seen order and each index is opened
/// once. The answer text and the reasoning text share one `text` block.
#[derive(Debug)]
pub struct ContentAccumulator {
    mode: ToolArgumentsMode,
    next_block_index: usize,
    open_blocks: SmallVec<[usize; 4]>,
    text_block: Option<usize>,
    tool_calls: FxHashMap<u32, ToolCallState>,
    saw_tool_call: bool,
    answer_text: String,
    reasoning_text: String,
    usage: Option<OpenAiUsage>,
}

impl ContentAccumulator {
    #[must_use]
    pub fn new(mode: ToolArgumentsMode) -> Self {
        Self {
            mode,
            next_block_index: 0,
            open_blocks: SmallVec::new(),
            text_block: None,
            tool_calls: FxHashMap::default(),
            saw_tool_call: false,
            answer_text: String::new(),
            reasoning_text: String::new(),
            usage: None,
        }
    }

    /// Remember the latest backend usage object. Later reports replace earlier ones.
    pub fn record_usage(&mut self, usage: OpenAiUsage) {
        self.usage = Some(usage);
    }

    /// Prompt tokens from the latest usage report, `0` if none arrived yet.
    #[must_use]
    pub fn reported_input_tokens(&self) -> u64 {
        self.usage
            .and_then(|usage| usage.prompt_tokens)
            .unwrap_or(0)
    }

    #[must_use]
    pub fn saw_tool_call(&self) -> bool {
        self.saw_tool_call
    }

    #[must_use]
    pub fn answer_text(&self) -> &str {
        &self.answer_text
    }

    #[must_use]
    pub fn reasoning_text(&self) -> &str {
        &self.reasoning_text
    }

    /// Accumulated argument length per backend tool-call index, ascending.
    #[must_use]
    pub fn tool_argument_lengths(&self) -> Vec<(u32, usize)> {
        let mut lengths: Vec<(u32, usize)> = self
            .tool_calls
            .iter()
            .map(|(index, state)| (*index, state.arguments.len()))
            .collect();
        lengths.sort_unstable();
        lengths
    }

    /// Apply one delta, pushing the outgoing events it produces onto `out`.
    pub fn apply_into(&mut self, delta: BackendDelta, out: &mut Vec<AnthropicStreamEvent>) {
        match delta {
            BackendDelta::Text(text) => {
                let index = self.ensure_text_block(out);
                self.answer_text.push_str(&text);
                out.push(AnthropicStreamEvent::ContentBlockDelta {
                    index,
                    delta: AnthropicDelta::TextDelta { text },
                });
            }
            BackendDelta::Reasoning(thinking) => {
                let index = self.ensure_text_block(out);
                self.reasoning_text.push_str(&thinking);
                out.push(AnthropicStreamEvent::ContentBlockDelta {
                    index,
                    delta: AnthropicDelta::ThinkingDelta { thinking },
                });
            }
            BackendDelta::ToolCalls(fragments) => {
                for fragment in fragments {
                    self.apply_tool_fragment(fragment, out);
                }
            }
            BackendDelta::Empty => {}
        }
    }

    /// Close every opened block in open order and compute the closing summary.
    pub fn finish_into(&mut self, out: &mut Vec<AnthropicStreamEvent>) -> StreamSummary {
        out.extend(
            self.open_blocks
                .drain(..)
                .map(|index| AnthropicStreamEvent::ContentBlockStop { index }),
        );

        let stop_reason = if self.saw_tool_call {
            StopReason::ToolUse
        } else {
            StopReason::EndTurn
        };
        let reported = self.usage.unwrap_or_default();
        let output_tokens = resolve_output_tokens(
            reported.completion_tokens,
            &self.answer_text,
            &self.reasoning_text,
        );
        StreamSummary {
            stop_reason,
            usage: AnthropicUsage {
                input_tokens: reported.prompt_tokens.unwrap_or(0),
                output_tokens,
            },
        }
    }

    /// One-line description of the accumulated content for error context.
    #[must_use]
    pub fn diagnostic_context(&self) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            "answer={}B \"{}\" reasoning={}B \"{}\" tool_args=[",
            self.answer_text.len(),
            preview(&self.answer_text),
            self.reasoning_text.len(),
            preview(&self.reasoning_text),
        );
        for (pos, (index, len)) in self.tool_argument_lengths().into_iter().enumerate() {
            if pos > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{index}:{len}B");
        }
        out.push(']');
        out
    }

    fn allocate_block(&mut self) -> usize {
        let index = self.next_block_index;
        self.next_block_index += 1;
        self.open_blocks.push(index);
        index
    }

    fn ensure_text_block(&mut self, out: &mut Vec<AnthropicStreamEvent>) -> usize {
        if let Some(index) = self.text_block {
            return index;
        }
        let index = self.allocate_block();
        self.text_block = Some(index);
        out.push(AnthropicStreamEvent::ContentBlockStart {
            index,
            content_block: AnthropicContentBlock::Text {
                text: String::new(),
            },
        });
        index
    }

    fn apply_tool_fragment(&mut self, fragment: ToolCallFragment, out: &mut Vec<AnthropicStreamEvent>) {
        self.saw_tool_call = true;

        if !self.tool_calls.contains_key(&fragment.index) {
            let block_index = self.allocate_block();
            let id = non_empty(fragment.id).unwrap_or_else(|| {
                let generated = next_call_id();
                debug!(tool_index = fragment.index, id = %generated, "tool call without id");
                generated
            });
            let name = fragment.name.unwrap_or_else(|| {
                warn!(tool_index = fragment.index, "tool call started without a name");
                String::new()
            });
            out.push(AnthropicStreamEvent::ContentBlockStart {
                index: block_index,
                content_block: AnthropicContentBlock::ToolUse {
                    id,
                    name,
                    input: serde_json::Value::Object(serde_json::Map::new()),
                },
            });
            self.tool_calls.insert(
                fragment.index,
                ToolCallState {
                    block_index,
                    arguments: String::new(),
                },
            );
        }

        let Some(arguments) = fragment.arguments.filter(|s| !s.is_empty()) else {
            return;
        };
        let mode = self.mode;
        let Some(state) = self.tool_calls.get_mut(&fragment.index) else {
            return;
        };
        if let Some(partial_json) = argument_suffix(mode, &mut state.arguments, arguments) {
            out.push(AnthropicStreamEvent::ContentBlockDelta {
                index: state.block_index,
                delta: AnthropicDelta::InputJsonDelta { partial_json },
            });
        }
    }
}

/// Fold `incoming` into `accumulated` and return the text to emit, if any.
///
/// Never shrinks `accumulated`. In `Auto`, a fragment that is a prefix of
/// what was already emitted (a replay or a shorter cumulative resend) emits
/// nothing.
fn argument_suffix(
    mode: ToolArgumentsMode,
    accumulated: &mut String,
    incoming: String,
) -> Option<String> {
    match mode {
        ToolArgumentsMode::Incremental => {
            accumulated.push_str(&incoming);
            Some(incoming)
        }
        ToolArgumentsMode::Cumulative => {
            if incoming.len() <= accumulated.len() {
                return None;
            }
            let Some(suffix) = incoming.get(accumulated.len()..) else {
                warn!(
                    emitted = accumulated.len(),
                    "cumulative tool arguments diverged mid-character; fragment skipped"
                );
                return None;
            };
            if !incoming.starts_with(accumulated.as_str()) {
                warn!(
                    emitted = accumulated.len(),
                    "cumulative tool arguments diverged from emitted prefix"
                );
            }
            let suffix = suffix.to_string();
            *accumulated = incoming;
            Some(suffix)
        }
        ToolArgumentsMode::Auto => {
            if accumulated.is_empty() {
                accumulated.push_str(&incoming);
                return Some(incoming);
            }
            if incoming.len() > accumulated.len() && incoming.starts_with(accumulated.as_str()) {
                let suffix = incoming[accumulated.len()..].to_string();
                *accumulated = incoming;
                return Some(suffix);
            }
            if accumulated.starts_with(incoming.as_str()) {
                return None;
            }
            accumulated.push_str(&incoming);
            Some(incoming)
        }
    }
}
