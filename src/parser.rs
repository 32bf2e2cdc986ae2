use crate::types::{ChunkType, ContentBlock, CaptureResponse, StreamingChunk, Usage};
use chrono::Utc;
use std::time::Instant;
use thin_logger::log;
use uuid::Uuid;

/// A content block still being accumulated. Finalized into a `ContentBlock`
/// on `content_block_stop`.
enum PendingBlock {
   Text { text: String },
   ToolUse { id: String, name: String, json: String },
   /// Any other block type (`tool_result`, `image`) arrives whole from
   /// upstream in a single `content_block_start` with no deltas, so it is
   /// carried through unparsed until `content_block_stop` closes it.
   Opaque,
}

/// Incremental state machine that rebuilds a `CaptureResponse` from an SSE
/// byte stream, one chunk at a time, tolerating frames split across chunk
/// boundaries.
///
/// A reconstructor is owned exclusively by the forwarder task that created
/// it and is never reused across requests.
pub struct SseReconstructor {
   request_id: Uuid,
   started_at: Instant,
   pending_line: String,
   message_id: Option<String>,
   model: Option<String>,
   usage: Usage,
   stop_reason: Option<String>,
   content: Vec<ContentBlock>,
   current_block: Option<PendingBlock>,
}

impl SseReconstructor {
   pub fn new(request_id: Uuid) -> Self {
      Self {
         request_id,
         started_at: Instant::now(),
         pending_line: String::new(),
         message_id: None,
         model: None,
         usage: Usage::default(),
         stop_reason: None,
         content: Vec::new(),
         current_block: None,
      }
   }

   /// Feeds the next chunk of raw bytes from upstream. Never blocks; pure
   /// state-machine transitions only.
   pub fn feed(&mut self, bytes: &[u8]) {
      let text = String::from_utf8_lossy(bytes);
      self.pending_line.push_str(&text);

      // Keep any trailing partial line in the buffer for the next feed().
      let mut complete_up_to = 0;
      for (idx, ch) in self.pending_line.char_indices() {
         if ch == '\n' {
            complete_up_to = idx + 1;
         }
      }
      let ready: String = self.pending_line[..complete_up_to].to_string();
      self.pending_line = self.pending_line[complete_up_to..].to_string();

      for raw_line in ready.split('\n') {
         let line = raw_line.trim_end_matches('\r');
         self.process_line(line);
      }
   }

   fn process_line(&mut self, line: &str) {
      if line.is_empty() || line.starts_with(':') {
         return;
      }
      let Some(data) = line.strip_prefix("data: ") else {
         return;
      };
      if data == "[DONE]" {
         return;
      }

      match serde_json::from_str::<StreamingChunk>(data) {
         Ok(chunk) => self.apply(chunk),
         Err(e) => {
            log::debug!("dropping malformed SSE frame: {e}");
         }
      }
   }

   fn apply(&mut self, chunk: StreamingChunk) {
      match chunk.chunk_type {
         ChunkType::MessageStart => {
            if let Some(message) = chunk.message {
               self.message_id = Some(message.id);
               self.model = Some(message.model);
               self.usage = message.usage;
            }
         }
         ChunkType::ContentBlockStart => {
            let Some(block) = chunk.content_block else {
               return;
            };
            self.current_block = Some(match block.block_type.as_str() {
               "text" => PendingBlock::Text {
                  text: block.text.unwrap_or_default(),
               },
               "tool_use" => PendingBlock::ToolUse {
                  id: block.id.unwrap_or_default(),
                  name: block.name.unwrap_or_default(),
                  json: String::new(),
               },
               _ => PendingBlock::Opaque,
            });
         }
         ChunkType::ContentBlockDelta => {
            let Some(delta) = chunk.delta else { return };
            match &mut self.current_block {
               Some(PendingBlock::Text { text }) => {
                  if let Some(t) = delta.text {
                     text.push_str(&t);
                  }
               }
               Some(PendingBlock::ToolUse { json, .. }) => {
                  if let Some(partial) = delta.partial_json {
                     json.push_str(&partial);
                  }
               }
               _ => {}
            }
         }
         ChunkType::ContentBlockStop => {
            if let Some(block) = self.current_block.take() {
               self.content.push(finalize_block(block));
            }
         }
         ChunkType::MessageDelta => {
            if let Some(delta) = chunk.delta {
               if let Some(reason) = delta.stop_reason {
                  self.stop_reason = Some(reason);
               }
            }
            if let Some(usage) = chunk.usage {
               if usage.output_tokens > 0 {
                  self.usage.output_tokens = usage.output_tokens;
               }
               if usage.input_tokens > 0 {
                  self.usage.input_tokens = usage.input_tokens;
               }
            }
         }
         ChunkType::MessageStop | ChunkType::Ping | ChunkType::Error => {}
      }
   }

   /// Finalizes whatever state is present — tolerating a missing
   /// `message_stop` or an unterminated block at upstream EOF — into a
   /// persisted `CaptureResponse`. Consumes `self`: a reconstructor is
   /// never fed again after this.
   pub fn finish(self) -> CaptureResponse {
      CaptureResponse {
         request_id: self.request_id,
         timestamp: Utc::now(),
         duration_ms: self.started_at.elapsed().as_millis() as u64,
         model: self.model.unwrap_or_else(|| "unknown".to_string()),
         content: self.content,
         stop_reason: self.stop_reason,
         usage: self.usage,
      }
   }
}

fn finalize_block(block: PendingBlock) -> ContentBlock {
   match block {
      PendingBlock::Text { text } => ContentBlock::Text { text },
      PendingBlock::ToolUse { id, name, json } => {
         let input = serde_json::from_str(&json).unwrap_or_else(|_| serde_json::json!({}));
         ContentBlock::ToolUse { id, name, input }
      }
      PendingBlock::Opaque => ContentBlock::Text { text: String::new() },
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn feed_all(chunks: &[&str]) -> CaptureResponse {
      let mut r = SseReconstructor::new(Uuid::nil());
      for c in chunks {
         r.feed(c.as_bytes());
      }
      r.finish()
   }

   const MESSAGE_START: &str = "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"type\":\"message\",\"role\":\"assistant\",\"model\":\"m\",\"usage\":{\"input_tokens\":5,\"output_tokens\":0}}}\n";

   #[test]
   fn reconstructs_text_across_chunk_boundaries() {
      let block_start =
         "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n";
      let delta1 = "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n";
      let delta2 = "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" there\"}}\n";
      let stop = "data: {\"type\":\"content_block_stop\",\"index\":0}\n";
      let msg_delta =
         "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"input_tokens\":0,\"output_tokens\":2}}\n";
      let msg_stop = "data: {\"type\":\"message_stop\"}\n";

      let response = feed_all(&[
         MESSAGE_START,
         block_start,
         delta1,
         delta2,
         stop,
         msg_delta,
         msg_stop,
      ]);

      assert_eq!(response.usage.input_tokens, 5);
      assert_eq!(response.usage.output_tokens, 2);
      assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));
      match &response.content[..] {
         [ContentBlock::Text { text }] => assert_eq!(text, "Hi there"),
         other => panic!("unexpected content: {other:?}"),
      }
   }

   #[test]
   fn splits_frame_across_feed_calls_identically() {
      let whole = format!(
         "{}{}{}",
         MESSAGE_START,
         "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n",
         "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hello\"}}\ndata: {\"type\":\"content_block_stop\",\"index\":0}\n"
      );

      let one_shot = feed_all(&[&whole]);

      let mut byte_by_byte = SseReconstructor::new(Uuid::nil());
      for byte in whole.as_bytes() {
         byte_by_byte.feed(&[*byte]);
      }
      let incremental = byte_by_byte.finish();

      assert_eq!(one_shot.content.len(), incremental.content.len());
      match (&one_shot.content[0], &incremental.content[0]) {
         (ContentBlock::Text { text: a }, ContentBlock::Text { text: b }) => assert_eq!(a, b),
         _ => panic!("content shape mismatch"),
      }
   }

   #[test]
   fn tool_use_with_split_json_deltas_parses() {
      let block_start = "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"t1\",\"name\":\"calc\"}}\n";
      let delta1 =
         "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"a\\\":\"}}\n";
      let delta2 =
         "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"1}\"}}\n";
      let stop = "data: {\"type\":\"content_block_stop\",\"index\":0}\n";

      let response = feed_all(&[MESSAGE_START, block_start, delta1, delta2, stop]);

      match &response.content[..] {
         [ContentBlock::ToolUse { id, name, input }] => {
            assert_eq!(id, "t1");
            assert_eq!(name, "calc");
            assert_eq!(input, &serde_json::json!({"a": 1}));
         }
         other => panic!("unexpected content: {other:?}"),
      }
   }

   #[test]
   fn malformed_tool_json_yields_empty_object() {
      let block_start = "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"t1\",\"name\":\"calc\"}}\n";
      let delta1 =
         "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"a\\\":\"}}\n";
      let stop = "data: {\"type\":\"content_block_stop\",\"index\":0}\n";

      let response = feed_all(&[MESSAGE_START, block_start, delta1, stop]);

      match &response.content[..] {
         [ContentBlock::ToolUse { input, .. }] => assert_eq!(input, &serde_json::json!({})),
         other => panic!("unexpected content: {other:?}"),
      }
   }

   #[test]
   fn message_start_then_eof_yields_empty_content() {
      let response = feed_all(&[MESSAGE_START]);
      assert!(response.content.is_empty());
      assert_eq!(response.usage.input_tokens, 5);
   }

   #[test]
   fn content_block_stop_without_active_block_is_ignored() {
      let stop = "data: {\"type\":\"content_block_stop\",\"index\":0}\n";
      let response = feed_all(&[MESSAGE_START, stop]);
      assert!(response.content.is_empty());
   }

   #[test]
   fn malformed_frame_is_dropped_and_parsing_continues() {
      let garbage = "data: {not json}\n";
      let block_start =
         "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"ok\"}}\n";
      let stop = "data: {\"type\":\"content_block_stop\",\"index\":0}\n";
      let response = feed_all(&[MESSAGE_START, garbage, block_start, stop]);
      match &response.content[..] {
         [ContentBlock::Text { text }] => assert_eq!(text, "ok"),
         other => panic!("unexpected content: {other:?}"),
      }
   }
}
