//! JSONL-backed conversation store: one file per session, one JSON object
//! per line, a metadata line first. The format is deliberately greppable:
//!
//! ```text
//! $ jq -C . ~/.steward/transcripts/<session>.jsonl
//! ```
//!
//! Each session gets a single writer task that owns the file handle;
//! appends are sent over an mpsc queue and acknowledged once flushed.
//! Serializing every write through the task is what guarantees exactly one
//! metadata line and no interleaving, even when the registry's create-then-
//! submit-initial-prompt pattern races two first appends.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::error::StewardErr;
use crate::stores::ConversationStore;
use steward_protocol::Message;

/// If the queue fills, `append` waits; the caller already treats
/// persistence as part of the message hand-off.
const WRITER_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Serialize, Deserialize)]
struct TranscriptMeta {
    session_id: String,
    created_at: String,
}

struct WriteRequest {
    line: String,
    ack: oneshot::Sender<std::io::Result<()>>,
}

pub struct JsonlTranscriptStore {
    dir: PathBuf,
    /// One live writer per session. Guarded by an async mutex because
    /// spawning a writer opens the file across an await point.
    writers: Mutex<HashMap<String, mpsc::Sender<WriteRequest>>>,
}

impl JsonlTranscriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            writers: Mutex::new(HashMap::new()),
        }
    }

    /// `~/.steward/transcripts`, falling back to a relative directory when
    /// no home directory is resolvable (containers, CI).
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".steward")
            .join("transcripts")
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        // Session ids are UUIDs in practice, but never trust them as paths.
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.jsonl"))
    }

    /// Fetch the session's writer, spawning it on first use. The spawn
    /// happens under the map lock, so only one task ever owns the file and
    /// only it decides whether the metadata line is needed.
    async fn writer(&self, session_id: &str) -> Result<mpsc::Sender<WriteRequest>> {
        let mut writers = self.writers.lock().await;
        if let Some(sender) = writers.get(session_id)
            && !sender.is_closed()
        {
            return Ok(sender.clone());
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(session_id))
            .await?;
        let fresh = file.metadata().await?.len() == 0;

        let (tx, mut rx) = mpsc::channel::<WriteRequest>(WRITER_QUEUE_CAPACITY);
        tokio::spawn(async move {
            let mut file = file;
            while let Some(request) = rx.recv().await {
                let result = write_line(&mut file, &request.line).await;
                let failed = result.is_err();
                let _ = request.ack.send(result);
                if failed {
                    // The handle is suspect now; drop it and let the next
                    // append spawn a fresh writer.
                    break;
                }
            }
        });

        if fresh {
            let meta = TranscriptMeta {
                session_id: session_id.to_string(),
                created_at: Utc::now().to_rfc3339(),
            };
            send_line(&tx, serde_json::to_string(&meta)?).await?;
        }
        writers.insert(session_id.to_string(), tx.clone());
        Ok(tx)
    }
}

async fn write_line(file: &mut tokio::fs::File, line: &str) -> std::io::Result<()> {
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await
}

/// Enqueue one line and wait for the writer's flush acknowledgement.
async fn send_line(sender: &mpsc::Sender<WriteRequest>, line: String) -> Result<()> {
    let (ack, done) = oneshot::channel();
    sender
        .send(WriteRequest { line, ack })
        .await
        .map_err(|_| StewardErr::Store("transcript writer task is gone".to_string()))?;
    done.await
        .map_err(|_| StewardErr::Store("transcript writer dropped the ack".to_string()))?
        .map_err(StewardErr::from)
}

#[async_trait]
impl ConversationStore for JsonlTranscriptStore {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>> {
        let path = self.path_for(session_id);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut messages = Vec::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            // Skip the metadata line and anything unparseable; a corrupt
            // line should not take the whole session down.
            match serde_json::from_str::<Message>(line) {
                Ok(message) => messages.push(message),
                Err(_) => tracing::warn!(session_id, "skipping unparseable transcript line"),
            }
        }
        Ok(messages)
    }

    async fn append(&self, session_id: &str, message: &Message) -> Result<()> {
        let sender = self.writer(session_id).await?;
        send_line(&sender, serde_json::to_string(message)?).await
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        // Dropping the sender ends the writer task and releases its handle.
        self.writers.lock().await.remove(session_id);
        let path = self.path_for(session_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn round_trips_messages_and_skips_meta() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonlTranscriptStore::new(dir.path());

        store
            .append("abc-123", &Message::user("hello"))
            .await
            .expect("append");
        store
            .append("abc-123", &Message::assistant("hi there"))
            .await
            .expect("append");

        let messages = store.load("abc-123").await.expect("load");
        assert_eq!(
            messages,
            vec![Message::user("hello"), Message::assistant("hi there")]
        );
    }

    #[tokio::test]
    async fn concurrent_first_appends_write_one_meta_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(JsonlTranscriptStore::new(dir.path()));

        let mut tasks = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store
                    .append("fresh", &Message::user(format!("m{i}")))
                    .await
                    .expect("append");
            }));
        }
        for task in tasks {
            task.await.expect("join");
        }

        let raw = std::fs::read_to_string(store.path_for("fresh")).expect("read raw");
        let meta_lines = raw
            .lines()
            .filter(|line| line.contains("created_at"))
            .count();
        assert_eq!(meta_lines, 1);
        assert!(raw.lines().next().expect("first line").contains("created_at"));
        assert_eq!(store.load("fresh").await.expect("load").len(), 8);
    }

    #[tokio::test]
    async fn missing_session_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonlTranscriptStore::new(dir.path());
        assert!(store.load("nope").await.expect("load").is_empty());
    }

    #[tokio::test]
    async fn clear_removes_the_transcript() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonlTranscriptStore::new(dir.path());
        store
            .append("s", &Message::user("x"))
            .await
            .expect("append");
        store.clear("s").await.expect("clear");
        assert!(store.load("s").await.expect("load").is_empty());
    }
}
