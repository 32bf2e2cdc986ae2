use axum::{
   body::Body,
   http::StatusCode,
   response::{IntoResponse, Response},
};
use std::fmt;

/// Error type for the proxy's request-handling path. Every variant maps to
/// a client-visible status code; nothing in here is allowed to abort the
/// upstream exchange once it has started — these are only raised before
/// forwarding or while building the client-visible response.
#[derive(Debug)]
pub enum ProxyError {
   /// Request body exceeded the 50 MiB cap.
   BodyTooLarge,
   /// Body was not valid UTF-8.
   RequestBodyError(String),
   /// Invalid HTTP method on the inbound request.
   InvalidMethod(String),
   /// Upstream connection failed or timed out.
   BadGateway(String),
   /// Capture log write failed.
   LogIo(String),
}

impl fmt::Display for ProxyError {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         ProxyError::BodyTooLarge => write!(f, "request body exceeds the 50 MiB limit"),
         ProxyError::RequestBodyError(msg) => write!(f, "request body error: {msg}"),
         ProxyError::InvalidMethod(msg) => write!(f, "invalid method: {msg}"),
         ProxyError::BadGateway(msg) => write!(f, "proxy request failed: {msg}"),
         ProxyError::LogIo(msg) => write!(f, "capture log error: {msg}"),
      }
   }
}

impl std::error::Error for ProxyError {}

impl IntoResponse for ProxyError {
   fn into_response(self) -> Response<Body> {
      let (status, error_label, message) = match &self {
         ProxyError::BodyTooLarge => (
            StatusCode::PAYLOAD_TOO_LARGE,
            "Request too large",
            self.to_string(),
         ),
         ProxyError::RequestBodyError(_) | ProxyError::InvalidMethod(_) => {
            (StatusCode::BAD_REQUEST, "Invalid request", self.to_string())
         }
         ProxyError::BadGateway(msg) => {
            (StatusCode::BAD_GATEWAY, "Proxy request failed", msg.clone())
         }
         ProxyError::LogIo(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal error",
            self.to_string(),
         ),
      };

      Response::builder()
         .status(status)
         .header("content-type", "application/json")
         .body(Body::from(
            serde_json::json!({ "error": error_label, "message": message }).to_string(),
         ))
         .unwrap()
   }
}
