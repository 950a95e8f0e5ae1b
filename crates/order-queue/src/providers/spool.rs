//! # Spool Directory Transport
//!
//! Durable local queues backed by the filesystem, for development and for
//! hosts without a native queue service.
//!
//! Each queue is a directory under the spool root, derived from the queue
//! path segments (`.\private$\OrderQueue` becomes `<root>/private$/OrderQueue`).
//! Every message is one file named `<stamp>-<pid>.msg`, where the stamp is a
//! process-monotonic nanosecond counter, so lexical order is arrival order.
//!
//! A message file holds a one-line JSON header followed by the raw body:
//!
//! ```text
//! {"label":"Order-42","durable":true,"enqueued_at":"2024-05-01T12:00:00Z"}
//! {"OrderId":"42",...}
//! ```
//!
//! Sends write a hidden temp file and rename it into place. Receives claim a
//! message by renaming it to `.claimed` before reading, so concurrent
//! consumers never deliver the same file twice. A claimed file is deleted
//! only once its contents have been turned into a message; claims left
//! behind by a crashed process are returned to their queue when a transport
//! is created over the same root.
//!
//! A file whose header cannot be read is still delivered, with the whole file
//! as the body, so the client can dead-letter it instead of losing it.

use crate::error::TransportError;
use crate::message::{QueuePath, RawMessage};
use crate::transport::{AccessMode, Transport, TransportHandle};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "spool_tests.rs"]
mod tests;

const MESSAGE_EXTENSION: &str = "msg";
const CLAIMED_EXTENSION: &str = "claimed";

/// Interval between directory scans while a receive waits
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Last arrival stamp issued in this process, shared by every spool instance
static LAST_STAMP: AtomicU64 = AtomicU64::new(0);

/// Envelope properties stored ahead of the body
#[derive(Debug, Serialize, Deserialize)]
struct SpoolHeader {
    label: String,
    durable: bool,
    enqueued_at: DateTime<Utc>,
}

/// Filesystem-backed transport
#[derive(Debug, Clone)]
pub struct SpoolTransport {
    root: PathBuf,
    handles: Arc<Mutex<HashMap<u64, QueuePath>>>,
    next_handle: Arc<AtomicU64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn io_error(context: &str, path: &Path, error: std::io::Error) -> TransportError {
    TransportError::unknown(
        format!("io:{:?}", error.kind()),
        format!("{} {}: {}", context, path.display(), error),
    )
}

/// Replace characters that are unsafe in a directory name
fn sanitize_segment(segment: &str) -> String {
    if segment == "." || segment == ".." {
        return "_".to_string();
    }

    segment
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '$' | '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl SpoolTransport {
    /// Create a spool transport rooted at `root`
    ///
    /// # Errors
    ///
    /// Returns error if the root directory cannot be created.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, TransportError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| io_error("Failed to create spool root", &root, e))?;

        let transport = Self {
            root,
            handles: Arc::new(Mutex::new(HashMap::new())),
            next_handle: Arc::new(AtomicU64::new(0)),
        };

        let recovered = transport.recover_claims().await?;
        if recovered > 0 {
            info!(
                root = %transport.root.display(),
                recovered = recovered,
                "Returned unfinished claims to their queues"
            );
        }

        Ok(transport)
    }

    /// Rename every `.claimed` file under the root back to `.msg`.
    ///
    /// Returns the number of messages put back. A claim still held by a live
    /// consumer is redelivered as well; delivery is at-least-once.
    pub async fn recover_claims(&self) -> Result<usize, TransportError> {
        let mut recovered = 0;
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| io_error("Failed to scan spool", &dir, e))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| io_error("Failed to scan spool", &dir, e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| io_error("Failed to scan spool", &path, e))?;

                if file_type.is_dir() {
                    pending.push(path);
                } else if path.extension().and_then(|e| e.to_str()) == Some(CLAIMED_EXTENSION) {
                    let restored = path.with_extension(MESSAGE_EXTENSION);
                    fs::rename(&path, &restored)
                        .await
                        .map_err(|e| io_error("Failed to restore claim", &path, e))?;
                    recovered += 1;
                }
            }
        }

        Ok(recovered)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the messages of `path`
    pub fn queue_dir(&self, path: &QueuePath) -> PathBuf {
        path.segments()
            .into_iter()
            .fold(self.root.clone(), |dir, segment| {
                dir.join(sanitize_segment(segment))
            })
    }

    /// Next arrival stamp, strictly greater than every stamp issued before
    fn next_stamp() -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        let previous = LAST_STAMP
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or_else(|last| last);

        now.max(previous.saturating_add(1))
    }

    fn check_handle(&self, handle: &TransportHandle) -> Result<(), TransportError> {
        if lock(&self.handles).contains_key(&handle.id()) {
            Ok(())
        } else {
            Err(TransportError::Corrupted {
                message: format!("handle {} is not open", handle.id()),
            })
        }
    }

    async fn ensure_dir(&self, path: &QueuePath) -> Result<PathBuf, TransportError> {
        let dir = self.queue_dir(path);
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(TransportError::unknown(
                "io:NotADirectory",
                format!("{} is not a directory", dir.display()),
            )),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(TransportError::NotFound {
                path: path.to_string(),
            }),
            Err(e) => Err(io_error("Failed to inspect queue", &dir, e)),
        }
    }

    /// Message file names in arrival order
    async fn list_messages(&self, dir: &Path) -> Result<Vec<String>, TransportError> {
        let mut entries = fs::read_dir(dir)
            .await
            .map_err(|e| io_error("Failed to list queue", dir, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("Failed to list queue", dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.')
                && Path::new(&name).extension().and_then(|e| e.to_str()) == Some(MESSAGE_EXTENSION)
            {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }

    /// Claim and consume the oldest message, if any
    async fn take_oldest(&self, dir: &Path) -> Result<Option<RawMessage>, TransportError> {
        for name in self.list_messages(dir).await? {
            let source = dir.join(&name);
            let claimed = source.with_extension(CLAIMED_EXTENSION);

            match fs::rename(&source, &claimed).await {
                Ok(()) => {}
                // Another consumer claimed it first
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error("Failed to claim message", &source, e)),
            }

            let contents = match fs::read(&claimed).await {
                Ok(contents) => contents,
                Err(e) => {
                    // Put the message back so a later receive can retry it
                    if let Err(release) = fs::rename(&claimed, &source).await {
                        warn!(
                            file = %claimed.display(),
                            error = %release,
                            "Failed to release claim on unreadable message"
                        );
                    }
                    return Err(io_error("Failed to read message", &claimed, e));
                }
            };

            let message = decode_file(contents, &claimed);
            if let Err(e) = fs::remove_file(&claimed).await {
                warn!(file = %claimed.display(), error = %e, "Failed to remove consumed message");
            }

            return Ok(Some(message));
        }

        Ok(None)
    }
}

/// Split a message file into header and body.
///
/// Without a readable header the whole file becomes the body, labelled with
/// the file stem.
fn decode_file(contents: Vec<u8>, file: &Path) -> RawMessage {
    let header = contents
        .iter()
        .position(|b| *b == b'\n')
        .and_then(|split| {
            serde_json::from_slice::<SpoolHeader>(&contents[..split])
                .ok()
                .map(|header| (split, header))
        });

    match header {
        Some((split, header)) => RawMessage {
            body: contents[split + 1..].to_vec().into(),
            label: header.label,
            durable: header.durable,
        },
        None => {
            warn!(file = %file.display(), "Message file has no readable header");
            let label = file
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            RawMessage {
                body: contents.into(),
                label,
                durable: true,
            }
        }
    }
}

/// Write `contents` to `temp_path`, then rename it to `final_path`.
///
/// On failure the temp file is removed so it cannot linger in the queue.
async fn publish(
    temp_path: &Path,
    final_path: &Path,
    contents: &[u8],
    durable: bool,
) -> Result<(), TransportError> {
    let published = match write_temp(temp_path, contents, durable).await {
        Ok(()) => fs::rename(temp_path, final_path)
            .await
            .map_err(|e| io_error("Failed to publish message", final_path, e)),
        Err(e) => Err(e),
    };

    if published.is_err() {
        if let Err(cleanup) = fs::remove_file(temp_path).await {
            if cleanup.kind() != ErrorKind::NotFound {
                warn!(
                    file = %temp_path.display(),
                    error = %cleanup,
                    "Failed to remove temp file of failed send"
                );
            }
        }
    }
    published
}

async fn write_temp(path: &Path, contents: &[u8], durable: bool) -> Result<(), TransportError> {
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| io_error("Failed to create temp file", path, e))?;
    file.write_all(contents)
        .await
        .map_err(|e| io_error("Failed to write message", path, e))?;
    file.flush()
        .await
        .map_err(|e| io_error("Failed to flush message", path, e))?;
    if durable {
        file.sync_all()
            .await
            .map_err(|e| io_error("Failed to sync message", path, e))?;
    }
    Ok(())
}

/// Persist the rename of a durable message. The message is already visible,
/// so a failure here is only logged.
#[cfg(unix)]
async fn sync_dir(dir: &Path) {
    let synced = match fs::File::open(dir).await {
        Ok(handle) => handle.sync_all().await,
        Err(e) => Err(e),
    };
    if let Err(e) = synced {
        warn!(dir = %dir.display(), error = %e, "Failed to sync queue directory");
    }
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) {}

fn encode_file(message: &RawMessage) -> Result<Vec<u8>, TransportError> {
    let header = SpoolHeader {
        label: message.label.clone(),
        durable: message.durable,
        enqueued_at: Utc::now(),
    };

    let mut contents = serde_json::to_vec(&header)
        .map_err(|e| TransportError::unknown("spool:InvalidHeader", e.to_string()))?;
    contents.push(b'\n');
    contents.extend_from_slice(&message.body);
    Ok(contents)
}

#[async_trait]
impl Transport for SpoolTransport {
    async fn queue_exists(&self, path: &QueuePath) -> Result<bool, TransportError> {
        match self.ensure_dir(path).await {
            Ok(_) => Ok(true),
            Err(TransportError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_queue(&self, path: &QueuePath) -> Result<(), TransportError> {
        let dir = self.queue_dir(path);
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("Failed to create queue parent", parent, e))?;
        }

        match fs::create_dir(&dir).await {
            Ok(()) => {
                debug!(queue_path = %path, dir = %dir.display(), "Created spool queue");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(TransportError::AlreadyExists {
                path: path.to_string(),
            }),
            Err(e) => Err(io_error("Failed to create queue", &dir, e)),
        }
    }

    async fn open(
        &self,
        path: &QueuePath,
        access: AccessMode,
    ) -> Result<TransportHandle, TransportError> {
        self.ensure_dir(path).await?;

        let id = self.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.handles).insert(id, path.clone());
        Ok(TransportHandle::new(id, path.clone(), access))
    }

    async fn receive_once(
        &self,
        handle: &TransportHandle,
        timeout: Duration,
    ) -> Result<RawMessage, TransportError> {
        self.check_handle(handle)?;
        let dir = self.ensure_dir(handle.path()).await?;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(message) = self.take_oldest(&dir).await? {
                return Ok(message);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(TransportError::Timeout { timeout });
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
            self.check_handle(handle)?;
        }
    }

    async fn send_once(
        &self,
        handle: &TransportHandle,
        message: &RawMessage,
    ) -> Result<(), TransportError> {
        self.check_handle(handle)?;
        let dir = self.ensure_dir(handle.path()).await?;

        let name = format!(
            "{:020}-{:010}.{}",
            Self::next_stamp(),
            std::process::id(),
            MESSAGE_EXTENSION
        );
        let final_path = dir.join(&name);
        let temp_path = dir.join(format!(".{}.tmp", name));
        let contents = encode_file(message)?;

        // Write to temporary file first (atomic write pattern)
        publish(&temp_path, &final_path, &contents, message.durable).await?;

        if message.durable {
            sync_dir(&dir).await;
        }
        Ok(())
    }

    fn close(&self, handle: &TransportHandle) -> Result<(), TransportError> {
        lock(&self.handles).remove(&handle.id());
        Ok(())
    }

    async fn message_count(&self, path: &QueuePath) -> Result<Option<u64>, TransportError> {
        let dir = self.ensure_dir(path).await?;
        Ok(Some(self.list_messages(&dir).await?.len() as u64))
    }

    fn name(&self) -> &'static str {
        "spool"
    }
}
