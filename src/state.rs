use crate::capture::CaptureLog;
use crate::fanout::FanOut;
use crate::types::{CaptureRequest, CaptureResponse, LiveEvent};
use thin_logger::log;

/// Shared state handed to every request-handler task: the capture log, the
/// live fan-out, and the upstream HTTP client. The durable log and the live
/// fan-out are independent collaborators rather than fields of one
/// do-everything struct.
#[derive(Clone)]
pub struct AppState {
   pub log: CaptureLog,
   pub fanout: FanOut,
   pub http: reqwest::Client,
}

impl AppState {
   pub fn new(log: CaptureLog, http: reqwest::Client) -> Self {
      Self {
         log,
         fanout: FanOut::new(),
         http,
      }
   }

   /// Persists and broadcasts a request record. Log-write failures are
   /// operational-only: they never propagate to the inbound HTTP exchange.
   pub async fn record_request(&self, request: &CaptureRequest) {
      if let Err(e) = self.log.log_request(request).await {
         log::error!("capture log write failed for request {}: {e}", request.id);
      }
      self.fanout.publish(LiveEvent::Request {
         data: request.clone(),
      });
   }

   pub async fn record_response(&self, response: &CaptureResponse) {
      if let Err(e) = self.log.log_response(response).await {
         log::error!(
            "capture log write failed for response to {}: {e}",
            response.request_id
         );
      }
      self.fanout.publish(LiveEvent::Response {
         data: response.clone(),
      });
   }
}
