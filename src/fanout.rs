use crate::types::LiveEvent;
use dashmap::DashMap;
use std::sync::Arc;
use thin_logger::log;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Fixed outbound buffer per subscriber; publish is a non-blocking
/// `try_send` so a slow subscriber never backs up the publisher.
const SUBSCRIBER_BUFFER: usize = 64;

/// Handle returned by `subscribe`. Dropping it (or calling `unsubscribe`)
/// removes the subscriber from the fan-out set.
pub struct Subscription {
   id: Uuid,
   fanout: FanOut,
   pub receiver: mpsc::Receiver<LiveEvent>,
}

impl Subscription {
   pub fn unsubscribe(self) {
      self.fanout.clients.remove(&self.id);
   }
}

/// One-to-many best-effort broadcast of captured requests/responses, bounded
/// and transport-agnostic: a slow or disconnected subscriber is dropped
/// rather than allowed to grow its queue without limit.
#[derive(Clone)]
pub struct FanOut {
   clients: Arc<DashMap<Uuid, mpsc::Sender<LiveEvent>>>,
}

impl FanOut {
   pub fn new() -> Self {
      Self {
         clients: Arc::new(DashMap::new()),
      }
   }

   pub fn subscribe(&self) -> Subscription {
      let id = Uuid::new_v4();
      let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
      self.clients.insert(id, tx);
      Subscription {
         id,
         fanout: self.clone(),
         receiver: rx,
      }
   }

   /// Enqueues `event` to every current subscriber without blocking. A full
   /// buffer drops the message for that subscriber; a closed receiver is
   /// unsubscribed lazily on the next publish.
   pub fn publish(&self, event: LiveEvent) {
      if self.clients.is_empty() {
         return;
      }
      // Copy the subscriber list under the lock, send outside it: never
      // hold the lock across I/O.
      let targets: Vec<(Uuid, mpsc::Sender<LiveEvent>)> = self
         .clients
         .iter()
         .map(|entry| (*entry.key(), entry.value().clone()))
         .collect();

      for (id, tx) in targets {
         match tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
               log::debug!("subscriber {id} buffer full, dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
               self.clients.remove(&id);
            }
         }
      }
   }

   pub fn subscriber_count(&self) -> usize {
      self.clients.len()
   }

   /// Drops every subscriber handle, closing their channels. Used on
   /// shutdown so a subscriber's `recv()` resolves to `None` instead of
   /// hanging.
   pub fn close_all(&self) {
      self.clients.clear();
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::types::CaptureRequest;
   use chrono::Utc;

   fn sample_event() -> LiveEvent {
      LiveEvent::Request {
         data: CaptureRequest {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            model: "m".to_string(),
            max_tokens: None,
            stream: false,
            system: Vec::new(),
            messages: Vec::new(),
            tools: None,
         },
      }
   }

   #[tokio::test]
   async fn publish_delivers_in_order_per_subscriber() {
      let fanout = FanOut::new();
      let mut sub = fanout.subscribe();

      for _ in 0..3 {
         fanout.publish(sample_event());
      }

      for _ in 0..3 {
         assert!(sub.receiver.try_recv().is_ok());
      }
      assert!(sub.receiver.try_recv().is_err());
   }

   #[tokio::test]
   async fn full_buffer_drops_without_blocking() {
      let fanout = FanOut::new();
      let sub = fanout.subscribe();

      for _ in 0..(SUBSCRIBER_BUFFER + 10) {
         fanout.publish(sample_event());
      }

      assert_eq!(fanout.subscriber_count(), 1);
      drop(sub);
   }

   #[tokio::test]
   async fn unsubscribe_removes_handle() {
      let fanout = FanOut::new();
      let sub = fanout.subscribe();
      assert_eq!(fanout.subscriber_count(), 1);
      sub.unsubscribe();
      assert_eq!(fanout.subscriber_count(), 0);
   }

   #[tokio::test]
   async fn closed_receiver_is_dropped_lazily_on_publish() {
      let fanout = FanOut::new();
      let sub = fanout.subscribe();
      drop(sub.receiver);

      fanout.publish(sample_event());
      assert_eq!(fanout.subscriber_count(), 0);
   }

   #[tokio::test]
   async fn close_all_ends_every_subscription() {
      let fanout = FanOut::new();
      let mut sub = fanout.subscribe();
      fanout.close_all();
      assert_eq!(fanout.subscriber_count(), 0);
      assert!(sub.receiver.recv().await.is_none());
   }
}
