//! Wire-shaped request/response types for model providers, plus conversions
//! to/from the shared domain `agent_core::Message`.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<LlmMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<LlmTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<bool>,
}

impl Default for LlmRequest {
    fn default() -> Self {
        Self {
            model: "claude-opus-4-1-20250805".to_string(),
            messages: Vec::new(),
            tools: None,
            max_tokens: Some(8192),
            temperature: None,
            system: None,
            thinking: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: String,
    pub content: LlmContent,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LlmContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl From<String> for LlmContent {
    fn from(s: String) -> Self {
        LlmContent::Text(s)
    }
}

impl From<&str> for LlmContent {
    fn from(s: &str) -> Self {
        LlmContent::Text(s.to_string())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String, input: serde_json::Value },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },

    #[serde(rename = "image")]
    Image { source: MediaSource },

    #[serde(rename = "document")]
    Document { source: MediaSource },
}

/// Wire-level addressing for a resolved `ContentPart` (§4.4): either inlined
/// base64 bytes or a direct URL the provider fetches itself. `ProviderFileId`
/// resolution is provider-specific and currently always falls back to
/// inlining, since no provider adapter here exposes an upload endpoint yet.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

/// Resolve every `agent_core::ContentPart` attached to a message into wire
/// `ContentBlock`s, per §4.4's "convert image/file parts to the provider's
/// native format, uploading when possible and falling back to inlined
/// bytes" contract. Local paths and data URLs are read and base64-inlined;
/// HTTP URLs are passed through as provider-fetched URLs; a provider file ID
/// has no generic wire shape, so it degrades to a URL-shaped reference built
/// from the raw ID (a provider-specific adapter may special-case it later).
pub async fn resolve_content_parts(parts: &[agent_core::ContentPart]) -> Vec<ContentBlock> {
    let mut blocks = Vec::with_capacity(parts.len());
    for part in parts {
        let (media_ref, is_image) = match part {
            agent_core::ContentPart::Image(r) => (r, true),
            agent_core::ContentPart::File(r) => (r, false),
        };
        let source = resolve_media_ref(media_ref).await;
        blocks.push(if is_image { ContentBlock::Image { source } } else { ContentBlock::Document { source } });
    }
    blocks
}

async fn resolve_media_ref(media_ref: &agent_core::MediaRef) -> MediaSource {
    match media_ref {
        agent_core::MediaRef::HttpUrl(url) => MediaSource::Url { url: url.clone() },
        agent_core::MediaRef::ProviderFileId(id) => MediaSource::Url { url: id.clone() },
        agent_core::MediaRef::DataUrl(data_url) => parse_data_url(data_url).unwrap_or_else(|| {
            MediaSource::Base64 { media_type: "application/octet-stream".to_string(), data: data_url.clone() }
        }),
        agent_core::MediaRef::LocalPath(path) => match tokio::fs::read(path).await {
            Ok(bytes) => {
                use base64::Engine;
                MediaSource::Base64 {
                    media_type: guess_media_type(path),
                    data: base64::engine::general_purpose::STANDARD.encode(bytes),
                }
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "failed to read local media path, sending empty placeholder");
                MediaSource::Base64 { media_type: guess_media_type(path), data: String::new() }
            }
        },
    }
}

fn parse_data_url(data_url: &str) -> Option<MediaSource> {
    let rest = data_url.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let media_type = header.strip_suffix(";base64").unwrap_or(header).to_string();
    Some(MediaSource::Base64 { media_type, data: data.to_string() })
}

fn guess_media_type(path: &str) -> String {
    match path.rsplit('.').next().unwrap_or("").to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
    .to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Streaming delta from the model adapter (§4.4).
#[derive(Clone, Debug)]
pub enum StreamDelta {
    Text(String),
    Thinking(String),
    ToolCallStart { id: String, name: String },
    ToolCallDelta { id: String, arguments: String },
    ToolCallEnd { id: String },
    Done { stop_reason: Option<String>, usage: Option<Usage>, parallel_tool_calls: bool },
    Error(String),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Clone, Debug, Default)]
pub struct AccumulatedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl AccumulatedToolCall {
    pub fn parse_arguments(&self) -> Result<serde_json::Value, serde_json::Error> {
        if self.arguments.is_empty() {
            Ok(serde_json::json!({}))
        } else {
            serde_json::from_str(&self.arguments)
        }
    }
}

/// Converts the domain session's `Message`s into wire-shaped `LlmMessage`s,
/// collapsing tool calls/results into the content-block shapes providers
/// expect. System-role messages are excluded — callers pass the system
/// instruction separately via `LlmRequest.system`. Async because resolving a
/// `LocalPath` image/file part requires reading it off disk (§4.4).
pub async fn to_llm_messages(messages: &[agent_core::Message]) -> Vec<LlmMessage> {
    let mut out = Vec::with_capacity(messages.len());
    for message in messages.iter().filter(|m| m.role != agent_core::Role::System) {
        out.push(to_llm_message(message).await);
    }
    out
}

async fn to_llm_message(message: &agent_core::Message) -> LlmMessage {
    let role = match message.role {
        agent_core::Role::System => "system",
        agent_core::Role::User => "user",
        agent_core::Role::Assistant => "assistant",
        agent_core::Role::Tool => "user",
    }
    .to_string();

    let content = match message.role {
        agent_core::Role::Tool => {
            let id = message.tool_call_id.clone().unwrap_or_default();
            LlmContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: id,
                content: message.text.clone(),
                is_error: message.is_error,
            }])
        }
        agent_core::Role::Assistant if !message.tool_calls.is_empty() => {
            let mut blocks = Vec::new();
            if !message.text.is_empty() {
                blocks.push(ContentBlock::Text { text: message.text.clone() });
            }
            blocks.extend(resolve_content_parts(&message.parts).await);
            for tc in &message.tool_calls {
                let input = serde_json::from_str(&tc.function.arguments).unwrap_or(serde_json::json!({}));
                blocks.push(ContentBlock::ToolUse { id: tc.id.clone(), name: tc.function.name.clone(), input });
            }
            LlmContent::Blocks(blocks)
        }
        _ if !message.parts.is_empty() => {
            let mut blocks = vec![ContentBlock::Text { text: message.text.clone() }];
            blocks.extend(resolve_content_parts(&message.parts).await);
            LlmContent::Blocks(blocks)
        }
        _ => LlmContent::Text(message.text.clone()),
    };

    LlmMessage { role, content }
}

/// Heals orphaned `tool_use` blocks (an assistant tool call with no matching
/// tool-result message yet) by synthesizing an empty-result pairing, so a
/// provider never sees a dangling tool_use at the end of the transcript.
pub fn validate_and_heal_messages(messages: &[LlmMessage]) -> Vec<LlmMessage> {
    let mut open_ids: Vec<String> = Vec::new();
    for message in messages {
        if let LlmContent::Blocks(blocks) = &message.content {
            for block in blocks {
                match block {
                    ContentBlock::ToolUse { id, .. } => open_ids.push(id.clone()),
                    ContentBlock::ToolResult { tool_use_id, .. } => {
                        open_ids.retain(|id| id != tool_use_id);
                    }
                    _ => {}
                }
            }
        }
    }

    if open_ids.is_empty() {
        return messages.to_vec();
    }

    let mut healed = messages.to_vec();
    let heal_blocks = open_ids
        .into_iter()
        .map(|id| ContentBlock::ToolResult { tool_use_id: id, content: "[no result recorded]".to_string(), is_error: Some(true) })
        .collect();
    healed.push(LlmMessage { role: "user".to_string(), content: LlmContent::Blocks(heal_blocks) });
    healed
}
