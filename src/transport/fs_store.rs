//! Directory-backed store.
//!
//! Stands in for the network: every key is a file under `store_dir`,
//! named by the SHA-256 of the key so arbitrary key strings are safe on
//! disk. Peers sharing the directory can talk to each other, which is what
//! the CLI and the integration tests rely on.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::client::{FetchError, FetchErrorCode, InsertError, StoreClient};

/// Local filesystem implementation of [`StoreClient`].
#[derive(Debug, Clone)]
pub struct FsStoreClient {
    store_dir: PathBuf,
    download_dir: PathBuf,
}

impl FsStoreClient {
    /// Create a client over `store_dir`, downloading into `download_dir`.
    pub fn new(store_dir: impl Into<PathBuf>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
            download_dir: download_dir.into(),
        }
    }

    /// Return the store directory.
    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.store_dir.join(hex::encode(Sha256::digest(key.as_bytes())))
    }
}

#[async_trait]
impl StoreClient for FsStoreClient {
    async fn fetch(&self, key: &str) -> Result<PathBuf, FetchError> {
        let source = self.key_path(key);
        match tokio::fs::try_exists(&source).await {
            Ok(true) => {}
            Ok(false) => return Err(FetchError::failed(FetchErrorCode::DataNotFound)),
            Err(e) => {
                return Err(FetchError::Failed {
                    code: FetchErrorCode::Internal,
                    message: e.to_string(),
                });
            }
        }

        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .map_err(|e| FetchError::Failed {
                code: FetchErrorCode::Internal,
                message: format!("download dir {}: {}", self.download_dir.display(), e),
            })?;
        let artifact = self.download_dir.join(format!("fetch-{}", Uuid::new_v4()));
        tokio::fs::copy(&source, &artifact)
            .await
            .map_err(|e| FetchError::Failed {
                code: FetchErrorCode::Internal,
                message: e.to_string(),
            })?;
        Ok(artifact)
    }

    async fn insert(&self, key: &str, data: &[u8]) -> Result<(), InsertError> {
        let target = self.key_path(key);
        tokio::fs::create_dir_all(&self.store_dir)
            .await
            .map_err(|e| InsertError::Failed(e.to_string()))?;

        let tmp = self.store_dir.join(format!(".insert-{}", Uuid::new_v4()));
        {
            let mut file = tokio::fs::File::create(&tmp)
                .await
                .map_err(|e| InsertError::Failed(e.to_string()))?;
            file.write_all(data)
                .await
                .map_err(|e| InsertError::Failed(e.to_string()))?;
            file.sync_all()
                .await
                .map_err(|e| InsertError::Failed(e.to_string()))?;
        }

        // hard_link fails if the target exists, which gives write-once keys.
        let linked = tokio::fs::hard_link(&tmp, &target).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(InsertError::Collision {
                key: key.to_string(),
            }),
            Err(e) => Err(InsertError::Failed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn client(dir: &TempDir) -> FsStoreClient {
        FsStoreClient::new(dir.path().join("store"), dir.path().join("downloads"))
    }

    #[tokio::test]
    async fn test_fetch_missing_is_data_not_found() {
        let dir = TempDir::new().unwrap();
        match client(&dir).fetch("SSK@x/slot").await {
            Err(FetchError::Failed { code, .. }) => assert_eq!(code, FetchErrorCode::DataNotFound),
            other => panic!("expected DataNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_insert_then_fetch() {
        let dir = TempDir::new().unwrap();
        let c = client(&dir);
        c.insert("SSK@x/slot", b"id=1\n\nhi").await.unwrap();

        let artifact = c.fetch("SSK@x/slot").await.unwrap();
        assert_eq!(tokio::fs::read(&artifact).await.unwrap(), b"id=1\n\nhi");
        assert!(artifact.starts_with(dir.path().join("downloads")));

        // Each fetch hands out its own artifact.
        let again = c.fetch("SSK@x/slot").await.unwrap();
        assert_ne!(artifact, again);
    }

    #[tokio::test]
    async fn test_keys_are_write_once() {
        let dir = TempDir::new().unwrap();
        let c = client(&dir);
        c.insert("SSK@x/slot", b"first").await.unwrap();
        let err = c.insert("SSK@x/slot", b"second").await.unwrap_err();
        assert!(matches!(err, InsertError::Collision { .. }));

        let artifact = c.fetch("SSK@x/slot").await.unwrap();
        assert_eq!(tokio::fs::read(&artifact).await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let c = client(&dir);
        c.insert("a", b"1").await.unwrap();
        let _ = c.insert("a", b"2").await;
        let names: Vec<_> = std::fs::read_dir(c.store_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(!names[0].starts_with('.'));
    }
}
