use crate::{
   decompress,
   error::ProxyError,
   parser::SseReconstructor,
   state::AppState,
   types::{CaptureRequest, CaptureResponse, ContentBlock, ParsedMessage, SystemPrompt, Tool, Usage},
};
use axum::{
   body::{Body, Bytes},
   extract::{Request, State},
   http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
   response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::StreamExt;
use reqwest::header::{CONNECTION, CONTENT_ENCODING, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use serde::Deserialize;
use std::{str::FromStr, time::Duration, time::Instant};
use thin_logger::log::{debug, error, info};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;
const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const UPSTREAM_READ_TIMEOUT: Duration = Duration::from_secs(600);
const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");

pub fn build_http_client() -> reqwest::Client {
   reqwest::Client::builder()
      .connect_timeout(UPSTREAM_CONNECT_TIMEOUT)
      .timeout(UPSTREAM_READ_TIMEOUT)
      .build()
      .expect("failed to build upstream HTTP client")
}

/// Strips hop-by-hop headers and anything that only makes sense on the
/// original hop (`Host`, `Content-Length`).
fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
   let mut out = HeaderMap::new();
   for (key, value) in headers.iter() {
      let key_str = key.as_str();
      if key == HOST || key == CONTENT_LENGTH || key == CONNECTION || key == TRANSFER_ENCODING || key == KEEP_ALIVE
      {
         continue;
      }
      if let Ok(name) = HeaderName::from_str(key_str) {
         out.insert(name, value.clone());
      }
   }
   out
}

fn build_forward_headers(headers: &HeaderMap) -> HeaderMap {
   let mut forward = strip_hop_by_hop(headers);
   if let Ok(host) = HeaderValue::from_str("api.anthropic.com") {
      forward.insert(HOST, host);
   }
   forward
}

/// Best-effort extraction of a `CaptureRequest` from a raw JSON body.
/// Never fails the exchange: a body that doesn't parse at all still yields
/// a `CaptureRequest` with `model = "unknown"` and empty `messages`.
fn parse_capture_request(id: Uuid, body: &[u8]) -> CaptureRequest {
   let timestamp = Utc::now();
   let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
      return CaptureRequest {
         id,
         timestamp,
         model: "unknown".to_string(),
         max_tokens: None,
         stream: false,
         system: Vec::new(),
         messages: Vec::new(),
         tools: None,
      };
   };

   let model = value
      .get("model")
      .and_then(|m| m.as_str())
      .unwrap_or("unknown")
      .to_string();
   let max_tokens = value
      .get("max_tokens")
      .and_then(|m| m.as_u64())
      .map(|m| m as u32);
   let stream = value.get("stream").and_then(|s| s.as_bool()).unwrap_or(false);
   let system = value
      .get("system")
      .cloned()
      .and_then(|v| serde_json::from_value::<SystemPrompt>(v).ok())
      .map(SystemPrompt::into_blocks)
      .unwrap_or_default();
   let messages = value
      .get("messages")
      .cloned()
      .and_then(|v| serde_json::from_value::<Vec<ParsedMessage>>(v).ok())
      .unwrap_or_default();
   let tools = value
      .get("tools")
      .cloned()
      .and_then(|v| serde_json::from_value::<Vec<Tool>>(v).ok());

   CaptureRequest {
      id,
      timestamp,
      model,
      max_tokens,
      stream,
      system,
      messages,
      tools,
   }
}

pub async fn proxy_handler(
   State(state): State<AppState>,
   method: Method,
   uri: Uri,
   headers: HeaderMap,
   request: Request,
) -> Result<Response, ProxyError> {
   let request_id = Uuid::new_v4();
   let start_time = Instant::now();
   let path_and_query = uri
      .path_and_query()
      .map(|pq| pq.as_str().to_string())
      .unwrap_or_else(|| uri.path().to_string());

   if let Some(len) = headers
      .get(CONTENT_LENGTH)
      .and_then(|v| v.to_str().ok())
      .and_then(|s| s.parse::<usize>().ok())
   {
      if len > MAX_BODY_BYTES {
         return Err(ProxyError::BodyTooLarge);
      }
   }

   let body_bytes = axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES)
      .await
      .map_err(|_| ProxyError::BodyTooLarge)?;

   let capture_request = parse_capture_request(request_id, &body_bytes);
   debug!(
      "request {} -> {} ({}, stream={})",
      request_id, path_and_query, capture_request.model, capture_request.stream
   );
   state.record_request(&capture_request).await;

   let forward_headers = build_forward_headers(&headers);
   let url = format!("{ANTHROPIC_API_BASE}{path_and_query}");
   let method_reqwest = reqwest::Method::from_bytes(method.as_str().as_bytes())
      .map_err(|e| ProxyError::InvalidMethod(e.to_string()))?;

   let upstream = state
      .http
      .request(method_reqwest, &url)
      .headers(forward_headers)
      .body(body_bytes)
      .send()
      .await
      .map_err(|e| ProxyError::BadGateway(e.to_string()))?;

   let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
   info!(
      "response {} - status {} ({})",
      request_id,
      status.as_u16(),
      if capture_request.stream { "streaming" } else { "buffered" }
   );

   if capture_request.stream {
      let (rx, response_headers) = process_streaming_response(upstream, state, request_id, start_time);
      let body = Body::from_stream(ReceiverStream::new(rx));
      Ok(build_response(status, &response_headers, body))
   } else {
      let (body_bytes, response_headers) =
         process_non_streaming_response(upstream, state, request_id, start_time).await?;
      Ok(build_response(status, &response_headers, Body::from(body_bytes)))
   }
}

fn build_response(status: StatusCode, headers: &HeaderMap, body: Body) -> Response {
   let mut builder = Response::builder().status(status);
   for (key, value) in strip_hop_by_hop(headers).iter() {
      builder = builder.header(key, value);
   }
   builder.body(body).unwrap_or_else(|_| {
      (StatusCode::INTERNAL_SERVER_ERROR, "failed to build response").into_response()
   })
}

/// Tees the upstream byte stream to the client while feeding an
/// `SseReconstructor` in lock-step. The natural back-pressure of the
/// bounded channel means a slow client slows the upstream read.
fn process_streaming_response(
   response: reqwest::Response,
   state: AppState,
   request_id: Uuid,
   start_time: Instant,
) -> (mpsc::Receiver<Result<Bytes, axum::Error>>, HeaderMap) {
   let response_headers = response.headers().clone();
   let (tx, rx) = mpsc::channel::<Result<Bytes, axum::Error>>(32);

   tokio::spawn(async move {
      let mut reconstructor = SseReconstructor::new(request_id);
      let mut stream = response.bytes_stream();
      let mut upstream_failed = false;
      let mut client_gone = false;

      while let Some(chunk) = stream.next().await {
         match chunk {
            Ok(bytes) => {
               reconstructor.feed(&bytes);
               if tx.send(Ok(bytes)).await.is_err() {
                  client_gone = true;
                  break;
               }
            }
            Err(e) => {
               error!("upstream stream error for {request_id}: {e}");
               let _ = tx.send(Err(axum::Error::new(e))).await;
               upstream_failed = true;
               break;
            }
         }
      }

      if client_gone {
         debug!("client disconnected mid-stream for {request_id}, discarding partial reconstruction");
         return;
      }

      let mut response = reconstructor.finish();
      response.duration_ms = start_time.elapsed().as_millis() as u64;
      if upstream_failed {
         response.stop_reason = None;
      }
      state.record_response(&response).await;
   });

   (rx, response_headers)
}

#[derive(Debug, Deserialize, Default)]
struct UpstreamMessage {
   #[serde(default = "unknown_model")]
   model: String,
   #[serde(default)]
   content: Vec<ContentBlock>,
   #[serde(default)]
   stop_reason: Option<String>,
   #[serde(default)]
   usage: Usage,
}

fn unknown_model() -> String {
   "unknown".to_string()
}

async fn process_non_streaming_response(
   response: reqwest::Response,
   state: AppState,
   request_id: Uuid,
   start_time: Instant,
) -> Result<(Bytes, HeaderMap), ProxyError> {
   let response_headers = response.headers().clone();
   let raw_bytes = response
      .bytes()
      .await
      .map_err(|e| ProxyError::BadGateway(e.to_string()))?;

   let content_encoding = response_headers
      .get(CONTENT_ENCODING)
      .and_then(|v| v.to_str().ok());

   match decompress::decompress(content_encoding, &raw_bytes) {
      Some(decoded) => match serde_json::from_slice::<UpstreamMessage>(&decoded) {
         Ok(message) => {
            let response_record = CaptureResponse {
               request_id,
               timestamp: Utc::now(),
               duration_ms: start_time.elapsed().as_millis() as u64,
               model: message.model,
               content: message.content,
               stop_reason: message.stop_reason,
               usage: message.usage,
            };
            state.record_response(&response_record).await;
         }
         Err(e) => {
            debug!("response body for {request_id} did not parse as JSON: {e}");
         }
      },
      None => {
         debug!(
            "response body for {request_id} used an unsupported content-encoding ({:?})",
            content_encoding
         );
      }
   }

   Ok((raw_bytes, response_headers))
}
