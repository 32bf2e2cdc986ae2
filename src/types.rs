use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
   User,
   Assistant,
}

/// A single system-prompt block. Always the internal shape for `system`,
/// whether the wire request sent a bare string or an array of blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SystemBlock {
   #[serde(rename = "type", default = "default_text_type")]
   pub block_type: String,
   pub text: String,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub cache_control: Option<Value>,
}

fn default_text_type() -> String {
   "text".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
   Text(String),
   Blocks(Vec<SystemBlock>),
}

impl SystemPrompt {
   /// Normalizes either wire shape into the canonical `Vec<SystemBlock>`.
   pub fn into_blocks(self) -> Vec<SystemBlock> {
      match self {
         SystemPrompt::Text(text) => vec![SystemBlock {
            block_type: "text".to_string(),
            text,
            cache_control: None,
         }],
         SystemPrompt::Blocks(blocks) => blocks,
      }
   }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSource {
   pub media_type: String,
   pub data: String,
}

/// A single content block. Modeled as a tagged sum type, matching the
/// streaming protocol's own `type` discriminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
   Text {
      text: String,
   },
   ToolUse {
      id: String,
      name: String,
      input: Value,
   },
   ToolResult {
      tool_use_id: String,
      content: ToolResultContent,
      #[serde(default, skip_serializing_if = "Option::is_none")]
      is_error: Option<bool>,
   },
   Image {
      source: ImageSource,
   },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
   Text(String),
   Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
   Text(String),
   Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedMessage {
   pub role: Role,
   pub content: MessageContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
   pub name: String,
   pub description: String,
   pub input_schema: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
   #[serde(default)]
   pub input_tokens: u32,
   #[serde(default)]
   pub output_tokens: u32,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub cache_creation_input_tokens: Option<u32>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub cache_read_input_tokens: Option<u32>,
}

/// A durably captured inbound request, persisted once and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRequest {
   pub id: Uuid,
   pub timestamp: DateTime<Utc>,
   pub model: String,
   pub max_tokens: Option<u32>,
   pub stream: bool,
   #[serde(default)]
   pub system: Vec<SystemBlock>,
   #[serde(default)]
   pub messages: Vec<ParsedMessage>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub tools: Option<Vec<Tool>>,
}

/// A durably captured, stream-reconstructed response. `request_id` pairs it
/// with exactly one `CaptureRequest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureResponse {
   pub request_id: Uuid,
   pub timestamp: DateTime<Utc>,
   pub duration_ms: u64,
   pub model: String,
   pub content: Vec<ContentBlock>,
   pub stop_reason: Option<String>,
   pub usage: Usage,
}

/// One line of the append-only capture log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEntry {
   Request {
      timestamp: DateTime<Utc>,
      data: CaptureRequest,
   },
   Response {
      timestamp: DateTime<Utc>,
      data: CaptureResponse,
   },
}

impl LogEntry {
   pub fn request(data: CaptureRequest) -> Self {
      LogEntry::Request {
         timestamp: data.timestamp,
         data,
      }
   }

   pub fn response(data: CaptureResponse) -> Self {
      LogEntry::Response {
         timestamp: data.timestamp,
         data,
      }
   }
}

/// A request paired with its matching response, if one has arrived yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pair {
   pub request: CaptureRequest,
   pub response: Option<CaptureResponse>,
}

// ---------------------------------------------------------------------------
// Streaming protocol types (upstream SSE events)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChunkType {
   MessageStart,
   MessageDelta,
   MessageStop,
   ContentBlockStart,
   ContentBlockDelta,
   ContentBlockStop,
   Error,
   Ping,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StreamDelta {
   #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
   pub delta_type: Option<String>,
   #[serde(default)]
   pub text: Option<String>,
   #[serde(default)]
   pub partial_json: Option<String>,
   #[serde(default)]
   pub stop_reason: Option<String>,
   #[serde(default)]
   pub stop_sequence: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StreamMessageStart {
   pub id: String,
   pub model: String,
   #[serde(default)]
   pub usage: Usage,
}

/// Raw content-block-start payload, before it is reconciled into a
/// `ContentBlock`. `input` starts empty for `tool_use` blocks and is filled
/// in incrementally by `input_json_delta` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StreamContentBlock {
   #[serde(rename = "type")]
   pub block_type: String,
   #[serde(default)]
   pub text: Option<String>,
   #[serde(default)]
   pub id: Option<String>,
   #[serde(default)]
   pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StreamingChunk {
   #[serde(rename = "type")]
   pub chunk_type: ChunkType,
   #[serde(default)]
   pub index: Option<u32>,
   #[serde(default)]
   pub delta: Option<StreamDelta>,
   #[serde(default)]
   pub content_block: Option<StreamContentBlock>,
   #[serde(default)]
   pub message: Option<StreamMessageStart>,
   #[serde(default)]
   pub usage: Option<Usage>,
}

/// Opaque envelope broadcast to live subscribers:
/// `{"type": "request"|"response", "data": <entity>}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
   Request { data: CaptureRequest },
   Response { data: CaptureResponse },
}

impl From<&LogEntry> for LiveEvent {
   fn from(entry: &LogEntry) -> Self {
      match entry {
         LogEntry::Request { data, .. } => LiveEvent::Request { data: data.clone() },
         LogEntry::Response { data, .. } => LiveEvent::Response { data: data.clone() },
      }
   }
}
