//! Delayed, persistent acknowledgment publishing.
//!
//! Acks are not published the moment a message arrives: each one waits a
//! random delay first, so an observer of the store cannot pair a fetch
//! with its acknowledgment by timing. Pending acks are kept as files in a
//! queue directory until published, and are picked up again on restart.
//! Each file records the ack's due time, so a restart neither re-rolls the
//! delay nor publishes early.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinHandle, JoinSet};

use super::AckScheduler;
use crate::error::AckError;
use crate::transport::{InsertError, StoreClient};

/// Timing for acknowledgment publishing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckConfig {
    /// Upper bound of the random delay before the first insert attempt (seconds).
    pub max_delay_secs: u64,
    /// Insert attempts after the first one before giving up until restart.
    pub max_retries: u32,
    /// Base delay for exponential backoff between attempts (milliseconds).
    pub base_delay_ms: u64,
    /// Maximum backoff delay (milliseconds).
    pub max_backoff_ms: u64,
}

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            max_delay_secs: 3600,
            max_retries: 5,
            base_delay_ms: 30_000,
            max_backoff_ms: 30 * 60 * 1000,
        }
    }
}

impl AckConfig {
    /// Backoff before retry number `attempt` (0-based): `base * 2^attempt`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
        Duration::from_millis(delay_ms.min(self.max_backoff_ms))
    }

    fn initial_delay(&self) -> Duration {
        if self.max_delay_secs == 0 {
            return Duration::ZERO;
        }
        let ms = rand::thread_rng().gen_range(0..=self.max_delay_secs.saturating_mul(1000));
        Duration::from_millis(ms)
    }
}

/// One queue file: the key and when it becomes due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct QueuedAck {
    key: String,
    due_at: DateTime<Utc>,
}

impl QueuedAck {
    fn remaining(&self) -> Duration {
        (self.due_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Publishes acknowledgments in the background.
///
/// Dropping the procrastinator stops intake; the task returned by
/// [`start`](Self::start) then finishes the acks that are already due and
/// leaves the rest in the queue.
pub struct AckProcrastinator {
    queue_dir: PathBuf,
    tx: UnboundedSender<QueuedAck>,
    config: AckConfig,
}

impl AckProcrastinator {
    /// Start publishing through `client`, resuming acks left in `queue_dir`.
    pub fn start(
        queue_dir: impl Into<PathBuf>,
        client: Arc<dyn StoreClient>,
        config: AckConfig,
    ) -> Result<(Self, JoinHandle<()>), AckError> {
        let queue_dir = queue_dir.into();
        std::fs::create_dir_all(&queue_dir).map_err(|source| AckError::Queue {
            path: queue_dir.clone(),
            source,
        })?;
        let resumed = read_queue(&queue_dir)?;

        let (tx, rx) = mpsc::unbounded_channel();
        for ack in resumed {
            let _ = tx.send(ack);
        }
        let handle = tokio::spawn(dispatch(rx, client, config.clone(), queue_dir.clone()));
        Ok((
            Self {
                queue_dir,
                tx,
                config,
            },
            handle,
        ))
    }

    /// Keys still waiting to be published.
    pub fn pending(&self) -> Result<Vec<String>, AckError> {
        Ok(read_queue(&self.queue_dir)?
            .into_iter()
            .map(|ack| ack.key)
            .collect())
    }
}

impl AckScheduler for AckProcrastinator {
    fn schedule(&self, key: String) {
        let delay = chrono::Duration::from_std(self.config.initial_delay())
            .unwrap_or(chrono::Duration::zero());
        let ack = QueuedAck {
            due_at: Utc::now() + delay,
            key,
        };
        if let Err(e) = write_queued(&self.queue_dir, &ack) {
            tracing::warn!(
                key = %ack.key,
                error = %e,
                "Failed to persist pending acknowledgment; it will be lost on restart"
            );
        }
        if self.tx.send(ack).is_err() {
            tracing::warn!("Acknowledgment dispatcher stopped; ack left in queue");
        }
    }
}

fn queue_path(queue_dir: &Path, key: &str) -> PathBuf {
    queue_dir.join(hex::encode(Sha256::digest(key.as_bytes())))
}

/// Write a queue file through a temporary name so it is never seen torn.
fn write_queued(queue_dir: &Path, ack: &QueuedAck) -> std::io::Result<()> {
    let path = queue_path(queue_dir, &ack.key);
    let tmp = path.with_extension("tmp");
    let json = serde_json::to_vec(ack).map_err(std::io::Error::other)?;
    {
        let mut file = std::fs::File::create(&tmp)?;
        std::io::Write::write_all(&mut file, &json)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, &path)
}

fn read_queue(queue_dir: &Path) -> Result<Vec<QueuedAck>, AckError> {
    let queue_err = |source| AckError::Queue {
        path: queue_dir.to_path_buf(),
        source,
    };
    let mut acks = Vec::new();
    for entry in std::fs::read_dir(queue_dir).map_err(queue_err)? {
        let path = entry.map_err(queue_err)?.path();
        if path.extension().is_some_and(|ext| ext == "tmp") {
            continue;
        }
        let parsed = std::fs::read(&path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| serde_json::from_slice::<QueuedAck>(&bytes).map_err(|e| e.to_string()));
        match parsed {
            Ok(ack) => acks.push(ack),
            Err(error) => {
                tracing::warn!(path = %path.display(), error = %error, "Skipping unreadable ack");
            }
        }
    }
    acks.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(acks)
}

async fn dispatch(
    mut rx: UnboundedReceiver<QueuedAck>,
    client: Arc<dyn StoreClient>,
    config: AckConfig,
    queue_dir: PathBuf,
) {
    let mut in_flight = JoinSet::new();
    let mut waiting = Vec::new();
    loop {
        tokio::select! {
            ack = rx.recv() => match ack {
                Some(ack) => {
                    let path = queue_path(&queue_dir, &ack.key);
                    let due_at = ack.due_at;
                    let handle = in_flight.spawn(publish(Arc::clone(&client), ack, path, config.clone()));
                    waiting.push((due_at, handle));
                }
                None => break,
            },
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
        }
        waiting.retain(|(_, handle)| !handle.is_finished());
    }

    let now = Utc::now();
    let mut deferred = 0usize;
    for (due_at, handle) in &waiting {
        if *due_at > now {
            handle.abort();
            deferred += 1;
        }
    }
    if deferred > 0 {
        tracing::debug!(deferred, "Leaving acknowledgments that are not yet due in the queue");
    }
    while in_flight.join_next().await.is_some() {}
}

async fn publish(client: Arc<dyn StoreClient>, ack: QueuedAck, path: PathBuf, config: AckConfig) {
    tokio::time::sleep(ack.remaining()).await;
    let key = ack.key;

    for attempt in 0..=config.max_retries {
        match client.insert(&key, &[]).await {
            Ok(()) | Err(InsertError::Collision { .. }) => {
                let _ = tokio::fs::remove_file(&path).await;
                tracing::debug!(key = %key, "Acknowledgment published");
                return;
            }
            Err(e) => {
                tracing::debug!(key = %key, attempt = attempt + 1, error = %e, "Ack insert failed");
                if attempt < config.max_retries {
                    tokio::time::sleep(config.backoff(attempt)).await;
                }
            }
        }
    }

    tracing::warn!(
        key = %key,
        attempts = config.max_retries + 1,
        "Giving up on acknowledgment until restart"
    );
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::transport::FetchError;

    /// Records inserts, failing the first `failures` attempts.
    #[derive(Default)]
    struct RecordingClient {
        failures: AtomicU32,
        inserted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StoreClient for RecordingClient {
        async fn fetch(&self, _key: &str) -> Result<PathBuf, FetchError> {
            Err(FetchError::ConnectionTerminated)
        }

        async fn insert(&self, key: &str, data: &[u8]) -> Result<(), InsertError> {
            assert!(data.is_empty());
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(InsertError::ConnectionTerminated);
            }
            self.inserted.lock().unwrap().push(key.to_string());
            Ok(())
        }
    }

    fn fast_config() -> AckConfig {
        AckConfig {
            max_delay_secs: 0,
            max_retries: 3,
            base_delay_ms: 1,
            max_backoff_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_scheduled_ack_is_published_and_dequeued() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(RecordingClient::default());
        let (acks, handle) =
            AckProcrastinator::start(dir.path(), client.clone(), fast_config()).unwrap();

        acks.schedule("SSK@ack/ack-42".to_string());
        drop(acks);
        handle.await.unwrap();

        assert_eq!(*client.inserted.lock().unwrap(), vec!["SSK@ack/ack-42"]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(RecordingClient {
            failures: AtomicU32::new(2),
            ..Default::default()
        });
        let (acks, handle) =
            AckProcrastinator::start(dir.path(), client.clone(), fast_config()).unwrap();
        acks.schedule("SSK@ack/ack-1".to_string());
        drop(acks);
        handle.await.unwrap();

        assert_eq!(client.inserted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_but_keeps_ack_queued() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(RecordingClient {
            failures: AtomicU32::new(100),
            ..Default::default()
        });
        let (acks, handle) =
            AckProcrastinator::start(dir.path(), client.clone(), fast_config()).unwrap();
        acks.schedule("SSK@ack/ack-7".to_string());
        assert_eq!(acks.pending().unwrap(), vec!["SSK@ack/ack-7"]);
        drop(acks);
        handle.await.unwrap();

        assert!(client.inserted.lock().unwrap().is_empty());
        let queued: Vec<_> = read_queue(dir.path()).unwrap().into_iter().map(|a| a.key).collect();
        assert_eq!(queued, vec!["SSK@ack/ack-7"]);
    }

    fn queue(dir: &Path, key: &str, due_at: DateTime<Utc>) {
        let ack = QueuedAck {
            key: key.to_string(),
            due_at,
        };
        write_queued(dir, &ack).unwrap();
    }

    #[tokio::test]
    async fn test_resumes_queue_on_start() {
        let dir = TempDir::new().unwrap();
        queue(dir.path(), "SSK@ack/ack-9", Utc::now());

        let client = Arc::new(RecordingClient::default());
        let (acks, handle) =
            AckProcrastinator::start(dir.path(), client.clone(), fast_config()).unwrap();
        drop(acks);
        handle.await.unwrap();

        assert_eq!(*client.inserted.lock().unwrap(), vec!["SSK@ack/ack-9"]);
    }

    #[tokio::test]
    async fn test_overdue_ack_is_published_without_new_delay() {
        let dir = TempDir::new().unwrap();
        queue(dir.path(), "SSK@ack/ack-3", Utc::now() - chrono::Duration::minutes(5));

        let config = AckConfig {
            max_delay_secs: 3600,
            ..fast_config()
        };
        let client = Arc::new(RecordingClient::default());
        let (acks, handle) = AckProcrastinator::start(dir.path(), client.clone(), config).unwrap();
        drop(acks);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("overdue ack should not wait for a fresh delay")
            .unwrap();

        assert_eq!(*client.inserted.lock().unwrap(), vec!["SSK@ack/ack-3"]);
    }

    #[tokio::test]
    async fn test_ack_not_yet_due_stays_queued() {
        let dir = TempDir::new().unwrap();
        queue(dir.path(), "SSK@ack/ack-4", Utc::now() + chrono::Duration::hours(1));

        let client = Arc::new(RecordingClient::default());
        let (acks, handle) =
            AckProcrastinator::start(dir.path(), client.clone(), fast_config()).unwrap();
        drop(acks);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("closing intake should not wait for acks that are not due")
            .unwrap();

        assert!(client.inserted.lock().unwrap().is_empty());
        assert_eq!(read_queue(dir.path()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_schedule_records_due_time_within_delay() {
        let dir = TempDir::new().unwrap();
        let config = AckConfig {
            max_delay_secs: 60,
            ..fast_config()
        };
        let client = Arc::new(RecordingClient::default());
        let before = Utc::now();
        let (acks, _handle) = AckProcrastinator::start(dir.path(), client, config).unwrap();
        acks.schedule("SSK@ack/ack-5".to_string());

        let queued = read_queue(dir.path()).unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].key, "SSK@ack/ack-5");
        assert!(queued[0].due_at >= before);
        assert!(queued[0].due_at <= Utc::now() + chrono::Duration::seconds(60));
    }

    #[test]
    fn test_torn_queue_write_is_never_resumed() {
        let dir = TempDir::new().unwrap();
        queue(dir.path(), "SSK@ack/ack-6", Utc::now());
        assert!(!queue_path(dir.path(), "SSK@ack/ack-6").with_extension("tmp").exists());
        // A write interrupted by a crash before its rename.
        std::fs::write(
            queue_path(dir.path(), "SSK@ack/ack-8").with_extension("tmp"),
            b"{\"key\":\"SSK@ack/ac",
        )
        .unwrap();

        let queued = read_queue(dir.path()).unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].key, "SSK@ack/ack-6");
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let config = AckConfig {
            base_delay_ms: 100,
            max_backoff_ms: 1_000,
            ..AckConfig::default()
        };
        assert_eq!(config.backoff(0), Duration::from_millis(100));
        assert_eq!(config.backoff(1), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(800));
        assert_eq!(config.backoff(4), Duration::from_millis(1_000));
        assert_eq!(config.backoff(70), Duration::from_millis(1_000));
    }
}
