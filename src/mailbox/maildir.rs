//! Maildir-style mailbox on the local filesystem.

use std::io::{BufRead, ErrorKind, Read};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::MailboxSink;
use crate::error::MailboxError;

const NEXT_UID_FILE: &str = ".nextuid";

/// Attempts at finding a free uid before a store is refused.
const MAX_LINK_ATTEMPTS: usize = 8;

/// Writes each message to `tmp/`, then links it into `new/` as
/// `<uid>,<channel>`. An existing message is never replaced.
#[derive(Debug)]
pub struct MaildirSink {
    dir: PathBuf,
    /// Serializes uid allocation and linking into `new/`.
    uid_lock: Mutex<()>,
}

impl MaildirSink {
    /// Mailbox rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            uid_lock: Mutex::new(()),
        }
    }

    /// Return the mailbox root.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Messages in `new/`, ordered by uid.
    pub async fn messages(&self) -> std::io::Result<Vec<PathBuf>> {
        let new_dir = self.dir.join("new");
        let mut entries = match tokio::fs::read_dir(&new_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            out.push(entry.path());
        }
        out.sort_by_key(|p| uid_of(p).unwrap_or(u64::MAX));
        Ok(out)
    }

    /// Link `tmp_path` into `new/` under a fresh uid.
    async fn deliver(&self, tmp_path: &Path, channel: &str) -> std::io::Result<PathBuf> {
        let _guard = self.uid_lock.lock().await;
        let new_dir = self.dir.join("new");

        for _ in 0..MAX_LINK_ATTEMPTS {
            let uid = self.allocate_uid().await?;
            let target = new_dir.join(format!("{uid},{channel}"));
            match tokio::fs::hard_link(tmp_path, &target).await {
                Ok(()) => return Ok(target),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tracing::warn!(
                        target = %target.display(),
                        "Mailbox uid already in use, rescanning"
                    );
                    let next = self.scan_next_uid().await?;
                    self.write_next_uid(next).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free uid in {} after {} attempts", new_dir.display(), MAX_LINK_ATTEMPTS),
        ))
    }

    /// Take the next uid. A missing or unreadable counter is rebuilt from
    /// the messages already in `new/`. Caller holds `uid_lock`.
    async fn allocate_uid(&self) -> std::io::Result<u64> {
        let path = self.dir.join(NEXT_UID_FILE);
        let uid = match tokio::fs::read_to_string(&path).await {
            Ok(s) => match s.trim().parse::<u64>() {
                Ok(uid) if uid > 0 => uid,
                _ => {
                    tracing::warn!(
                        path = %path.display(),
                        content = %s.trim(),
                        "Mailbox uid counter unreadable, rebuilding from messages"
                    );
                    self.scan_next_uid().await?
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => self.scan_next_uid().await?,
            Err(e) => return Err(e),
        };
        self.write_next_uid(uid + 1).await?;
        Ok(uid)
    }

    /// One past the highest uid in `new/`.
    async fn scan_next_uid(&self) -> std::io::Result<u64> {
        let mut max = 0;
        for path in self.messages().await? {
            if let Some(uid) = uid_of(&path) {
                max = max.max(uid);
            }
        }
        Ok(max + 1)
    }

    /// Replace the counter file atomically.
    async fn write_next_uid(&self, next: u64) -> std::io::Result<()> {
        let path = self.dir.join(NEXT_UID_FILE);
        let tmp = self.dir.join(format!("{NEXT_UID_FILE}.tmp"));
        {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(next.to_string().as_bytes()).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp, &path).await
    }
}

fn uid_of(path: &Path) -> Option<u64> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split(',').next())
        .and_then(|uid| uid.parse().ok())
}

#[async_trait]
impl MailboxSink for MaildirSink {
    async fn store(
        &self,
        channel: &str,
        body: &mut (dyn BufRead + Send),
    ) -> Result<(), MailboxError> {
        let mut content = Vec::new();
        body.read_to_end(&mut content)?;

        let tmp_dir = self.dir.join("tmp");
        let new_dir = self.dir.join("new");
        tokio::fs::create_dir_all(&tmp_dir).await?;
        tokio::fs::create_dir_all(&new_dir).await?;

        let tmp_path = tmp_dir.join(Uuid::new_v4().to_string());
        {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&content).await?;
            file.sync_all().await?;
        }

        let delivered = self.deliver(&tmp_path, channel).await;
        let _ = tokio::fs::remove_file(&tmp_path).await;
        delivered?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_store_writes_into_new() {
        let dir = TempDir::new().unwrap();
        let sink = MaildirSink::new(dir.path().join("inbox"));

        let mut body = Cursor::new(b"hello".to_vec());
        sink.store("bob", &mut body).await.unwrap();
        let mut body = Cursor::new(b"again".to_vec());
        sink.store("carol", &mut body).await.unwrap();

        let messages = sink.messages().await.unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].ends_with("new/1,bob"));
        assert!(messages[1].ends_with("new/2,carol"));
        assert_eq!(tokio::fs::read(&messages[0]).await.unwrap(), b"hello");

        let leftovers = std::fs::read_dir(sink.dir().join("tmp")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    async fn bodies(sink: &MaildirSink) -> Vec<String> {
        let mut out = Vec::new();
        for path in sink.messages().await.unwrap() {
            out.push(tokio::fs::read_to_string(path).await.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_truncated_uid_counter_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let sink = MaildirSink::new(dir.path().join("inbox"));

        sink.store("bob", &mut Cursor::new(b"first".to_vec())).await.unwrap();
        std::fs::write(sink.dir().join(NEXT_UID_FILE), b"").unwrap();
        sink.store("bob", &mut Cursor::new(b"second".to_vec())).await.unwrap();

        assert_eq!(bodies(&sink).await, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_missing_uid_counter_resumes_after_existing_messages() {
        let dir = TempDir::new().unwrap();
        let sink = MaildirSink::new(dir.path().join("inbox"));

        sink.store("bob", &mut Cursor::new(b"one".to_vec())).await.unwrap();
        sink.store("carol", &mut Cursor::new(b"two".to_vec())).await.unwrap();
        std::fs::remove_file(sink.dir().join(NEXT_UID_FILE)).unwrap();
        sink.store("bob", &mut Cursor::new(b"three".to_vec())).await.unwrap();

        let messages = sink.messages().await.unwrap();
        assert!(messages[2].ends_with("new/3,bob"));
        assert_eq!(bodies(&sink).await, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_stale_uid_counter_skips_taken_name() {
        let dir = TempDir::new().unwrap();
        let sink = MaildirSink::new(dir.path().join("inbox"));

        sink.store("bob", &mut Cursor::new(b"kept".to_vec())).await.unwrap();
        // Counter rolled back to a uid that is already on disk.
        std::fs::write(sink.dir().join(NEXT_UID_FILE), b"1").unwrap();
        sink.store("bob", &mut Cursor::new(b"new".to_vec())).await.unwrap();

        assert_eq!(bodies(&sink).await, vec!["kept", "new"]);
        let leftovers = std::fs::read_dir(sink.dir().join("tmp")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_empty_mailbox() {
        let dir = TempDir::new().unwrap();
        let sink = MaildirSink::new(dir.path().join("inbox"));
        assert!(sink.messages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_mailbox_fails() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("inbox");
        std::fs::write(&root, b"not a directory").unwrap();
        let sink = MaildirSink::new(&root);

        let mut body = Cursor::new(b"hello".to_vec());
        assert!(matches!(
            sink.store("bob", &mut body).await,
            Err(MailboxError::Io(_))
        ));
    }
}
