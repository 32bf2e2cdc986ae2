use crate::{proxy::proxy_handler, state::AppState};
use axum::{
   Json, Router,
   extract::{
      State,
      ws::{Message, WebSocket, WebSocketUpgrade},
   },
   http::StatusCode,
   response::Response,
   routing::{any, get},
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use thin_logger::log::debug;

pub fn build_router(state: AppState) -> Router {
   Router::new()
      .route("/health", get(health_handler))
      .route("/api/captures", get(list_captures_handler).delete(clear_captures_handler))
      .route("/ws", get(ws_handler))
      .fallback(any(proxy_handler))
      .with_state(state)
}

async fn health_handler() -> Json<serde_json::Value> {
   Json(json!({ "status": "ok", "timestamp": Utc::now() }))
}

async fn list_captures_handler(State(state): State<AppState>) -> Json<Vec<crate::types::Pair>> {
   Json(state.log.get_pairs().await)
}

async fn clear_captures_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
   match state.log.clear().await {
      Ok(()) => (StatusCode::OK, Json(json!({ "status": "cleared" }))),
      Err(e) => (
         StatusCode::INTERNAL_SERVER_ERROR,
         Json(json!({ "error": "Internal error", "message": e.to_string() })),
      ),
   }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
   ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Pushes every live event to one WebSocket subscriber until it disconnects
/// or its outbound buffer fills and the fan-out drops it.
async fn handle_socket(socket: WebSocket, state: AppState) {
   let mut subscription = state.fanout.subscribe();
   let (mut sink, mut stream) = socket.split();

   let mut send_task = tokio::spawn(async move {
      while let Some(event) = subscription.receiver.recv().await {
         let Ok(text) = serde_json::to_string(&event) else {
            continue;
         };
         if sink.send(Message::Text(text)).await.is_err() {
            break;
         }
      }
      subscription.unsubscribe();
   });

   let mut recv_task = tokio::spawn(async move {
      while let Some(Ok(message)) = stream.next().await {
         if let Message::Close(_) = message {
            break;
         }
      }
   });

   tokio::select! {
      _ = &mut send_task => recv_task.abort(),
      _ = &mut recv_task => send_task.abort(),
   }
   debug!("WebSocket subscriber disconnected");
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::capture::CaptureLog;
   use tower::ServiceExt;

   async fn test_state() -> AppState {
      let dir = tempfile::tempdir().unwrap();
      let log = CaptureLog::open(dir.path()).await.unwrap();
      AppState::new(log, crate::proxy::build_http_client())
   }

   #[tokio::test]
   async fn health_returns_ok() {
      let router = build_router(test_state().await);
      let response = router
         .oneshot(
            axum::http::Request::builder()
               .uri("/health")
               .body(axum::body::Body::empty())
               .unwrap(),
         )
         .await
         .unwrap();
      assert_eq!(response.status(), StatusCode::OK);
   }

   #[tokio::test]
   async fn captures_starts_empty_and_clears_cleanly() {
      let router = build_router(test_state().await);
      let response = router
         .clone()
         .oneshot(
            axum::http::Request::builder()
               .uri("/api/captures")
               .body(axum::body::Body::empty())
               .unwrap(),
         )
         .await
         .unwrap();
      assert_eq!(response.status(), StatusCode::OK);

      let response = router
         .oneshot(
            axum::http::Request::builder()
               .method("DELETE")
               .uri("/api/captures")
               .body(axum::body::Body::empty())
               .unwrap(),
         )
         .await
         .unwrap();
      assert_eq!(response.status(), StatusCode::OK);
   }
}
