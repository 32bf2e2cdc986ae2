use crate::types::{CaptureRequest, CaptureResponse, LogEntry, Pair};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Durable append-only store of `LogEntry` records, backed by
/// `<data_dir>/messages.jsonl`. A single shared, cheaply-cloned handle
/// guards the open file.
///
/// Appends are serialized behind a write lock; reads take a read lock that
/// briefly excludes the writer.
#[derive(Clone)]
pub struct CaptureLog {
   path: PathBuf,
   file: Arc<RwLock<Option<File>>>,
}

impl CaptureLog {
   pub async fn open(data_dir: &std::path::Path) -> anyhow::Result<Self> {
      fs::create_dir_all(data_dir).await?;
      let path = data_dir.join("messages.jsonl");
      let file = OpenOptions::new()
         .create(true)
         .append(true)
         .open(&path)
         .await?;
      Ok(Self {
         path,
         file: Arc::new(RwLock::new(Some(file))),
      })
   }

   async fn append(&self, entry: &LogEntry) -> anyhow::Result<()> {
      let mut line = serde_json::to_string(entry)?;
      line.push('\n');

      let mut guard = self.file.write().await;
      if guard.is_none() {
         let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
         *guard = Some(file);
      }
      let file = guard.as_mut().expect("file just ensured open");
      file.write_all(line.as_bytes()).await?;
      file.flush().await?;
      Ok(())
   }

   pub async fn log_request(&self, request: &CaptureRequest) -> anyhow::Result<()> {
      self.append(&LogEntry::request(request.clone())).await
   }

   pub async fn log_response(&self, response: &CaptureResponse) -> anyhow::Result<()> {
      self.append(&LogEntry::response(response.clone())).await
   }

   /// Returns every entry in file order. A line that fails to parse as JSON
   /// (tolerated corruption of a trailing partial write) is skipped.
   pub async fn read_all(&self) -> Vec<LogEntry> {
      let guard = self.file.read().await;
      let Ok(raw) = fs::read_to_string(&self.path).await else {
         return Vec::new();
      };
      drop(guard);

      raw
         .lines()
         .filter_map(|line| serde_json::from_str::<LogEntry>(line).ok())
         .collect()
   }

   /// Returns every request paired with its matching response, if any, in
   /// request insertion order. If more than one response shares a
   /// `request_id` (forbidden by invariant, tolerated here), the last one
   /// wins.
   pub async fn get_pairs(&self) -> Vec<Pair> {
      let entries = self.read_all().await;
      let mut order: Vec<Uuid> = Vec::new();
      let mut requests: HashMap<Uuid, CaptureRequest> = HashMap::new();
      let mut responses: HashMap<Uuid, CaptureResponse> = HashMap::new();

      for entry in entries {
         match entry {
            LogEntry::Request { data, .. } => {
               order.push(data.id);
               requests.insert(data.id, data);
            }
            LogEntry::Response { data, .. } => {
               responses.insert(data.request_id, data);
            }
         }
      }

      order
         .into_iter()
         .filter_map(|id| {
            requests.remove(&id).map(|request| Pair {
               response: responses.get(&id).cloned(),
               request,
            })
         })
         .collect()
   }

   /// Closes the file, deletes it, and resets state. The next
   /// `log_request`/`log_response` call re-creates the file.
   pub async fn clear(&self) -> anyhow::Result<()> {
      let mut guard = self.file.write().await;
      *guard = None;
      if self.path.exists() {
         fs::remove_file(&self.path).await?;
      }
      Ok(())
   }

   /// Flushes and drops the open file handle without deleting it. Used on
   /// shutdown; the next append transparently reopens the file.
   pub async fn close(&self) {
      let mut guard = self.file.write().await;
      if let Some(mut file) = guard.take() {
         let _ = file.flush().await;
      }
   }
}
