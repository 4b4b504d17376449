use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("failed to encode archive payload for {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("archive write failed at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Write-once blob store for raw fetch/insert payloads.
///
/// Archived blobs are audit provenance, not a read path: a stored
/// `{username}/{local_date}/{category}.json` is proof that a sync for that
/// (user, date, category) completed.
pub trait ArchiveStore: Send + Sync {
    fn put<'a>(
        &'a self,
        path: &'a str,
        payload: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<(), ArchiveError>>;
}

impl<T> ArchiveStore for Arc<T>
where
    T: ArchiveStore + ?Sized,
{
    fn put<'a>(
        &'a self,
        path: &'a str,
        payload: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<(), ArchiveError>> {
        (**self).put(path, payload)
    }
}

/// Filesystem-backed archive store.
///
/// Blob keys map directly to relative file paths under `root`.
pub struct FsArchiveStore {
    root: PathBuf,
}

impl FsArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(Path::new(key))
    }
}

impl ArchiveStore for FsArchiveStore {
    fn put<'a>(
        &'a self,
        path: &'a str,
        payload: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<(), ArchiveError>> {
        Box::pin(async move {
            let blob_path = self.blob_path(path);
            let encoded = serde_json::to_vec_pretty(payload).map_err(|source| {
                ArchiveError::Encode {
                    path: path.to_string(),
                    source,
                }
            })?;

            if let Some(parent) = blob_path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| ArchiveError::Io {
                        path: path.to_string(),
                        source,
                    })?;
            }

            tokio::fs::write(&blob_path, encoded)
                .await
                .map_err(|source| ArchiveError::Io {
                    path: path.to_string(),
                    source,
                })?;

            debug!(event = "archive_blob_written", blob = path, "archived payload");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_writes_blob_under_nested_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArchiveStore::new(dir.path());

        store
            .put("alice/2024-03-01/steps.json", &json!({"inserted_count": 3}))
            .await
            .expect("put should succeed");

        let written = std::fs::read_to_string(dir.path().join("alice/2024-03-01/steps.json"))
            .expect("blob should exist");
        assert!(written.contains("inserted_count"));
    }

    #[tokio::test]
    async fn put_overwrites_existing_blob() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArchiveStore::new(dir.path());

        store
            .put("bob/2024-03-01/steps.json", &json!({"v": 1}))
            .await
            .expect("first put");
        store
            .put("bob/2024-03-01/steps.json", &json!({"v": 2}))
            .await
            .expect("second put");

        let written = std::fs::read_to_string(dir.path().join("bob/2024-03-01/steps.json"))
            .expect("blob should exist");
        assert!(written.contains("\"v\": 2"));
    }
}
