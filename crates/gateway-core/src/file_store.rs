//! File-store commit and rollback across local and SFTP store pools.
//!
//! The SFTP wire protocol is an explicit external collaborator (spec §1)
//! and no SFTP crate exists anywhere in the retrieval pack used to build
//! this workspace, so [`FileStore`] is a plain trait: the commit/rollback
//! *logic* named in spec §4.11 (grouping, overwrite-refusal, rollback on
//! non-optional failure) is fully implemented and fully testable against
//! an in-memory fake, independent of any concrete wire protocol.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::file_stage::TempFileRecord;

/// A destination a staged file can be committed to.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Write `contents` to `destination`, relative to the store's base path.
    async fn put(&self, destination: &str, contents: &[u8]) -> Result<()>;
    /// Whether `destination` already exists.
    async fn exists(&self, destination: &str) -> Result<bool>;
    /// Remove `destination`. Used only during rollback; failures here are
    /// logged, never surfaced.
    async fn delete(&self, destination: &str) -> Result<()>;
    /// Read back the full contents of `destination`, for the `relative_path`
    /// file-response source (§4.10).
    async fn get(&self, destination: &str) -> Result<Vec<u8>>;
}

/// A local-filesystem store rooted at `base_path`.
pub struct LocalStore {
    pub base_path: PathBuf,
}

#[async_trait]
impl FileStore for LocalStore {
    async fn put(&self, destination: &str, contents: &[u8]) -> Result<()> {
        let path = self.base_path.join(destination);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    async fn exists(&self, destination: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.base_path.join(destination)).await?)
    }

    async fn delete(&self, destination: &str) -> Result<()> {
        let path = self.base_path.join(destination);
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, destination: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.base_path.join(destination)).await?)
    }
}

/// Connection coordinates an SFTP-backed store is grouped by: stores
/// sharing `(host, port, username, password)` reuse one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SftpGroupKey {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// Per-route/global policy controlling which stores a commit targets.
#[derive(Debug, Clone)]
pub struct FileCommitPolicy {
    pub stores: Vec<String>,
    pub overwrite_existing_files: bool,
    pub optional_stores: std::collections::HashSet<String>,
}

impl FileCommitPolicy {
    pub fn is_optional(&self, store_name: &str) -> bool {
        self.optional_stores.contains(store_name)
    }
}

/// The pool of named stores a committer can resolve against.
#[derive(Default)]
pub struct StorePool {
    stores: HashMap<String, Arc<dyn FileStore>>,
}

impl StorePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, store: Arc<dyn FileStore>) {
        self.stores.insert(name.into(), store);
    }

    fn get(&self, name: &str) -> Result<&Arc<dyn FileStore>> {
        self.stores
            .get(name)
            .ok_or_else(|| Error::config(format!("unknown file store '{name}'")))
    }

    /// Resolve a store by name, for callers outside this module (the
    /// `relative_path` file-response source reads back through here).
    pub fn store(&self, name: &str) -> Result<Arc<dyn FileStore>> {
        self.get(name).cloned()
    }
}

/// Tracks, per store, whether the commit of every temp file to that store
/// succeeded — the basis for rollback decisions.
#[derive(Default)]
struct StoreTracker {
    succeeded: Mutex<Vec<String>>,
}

/// Outcome of a commit attempt.
#[derive(Debug)]
pub enum CommitOutcome {
    Committed,
    /// Refuse-to-overwrite: surfaces as 409.
    Conflict { destination: String },
}

/// Run the file-store committer: for every temp file, attempt to commit it
/// to every configured store, rolling back already-successful stores on any
/// non-optional failure.
pub async fn commit_staged_files(
    pool: &StorePool,
    policy: &FileCommitPolicy,
    files: &[TempFileRecord],
) -> Result<CommitOutcome> {
    if files.is_empty() {
        return Ok(CommitOutcome::Committed);
    }

    let tracker = StoreTracker::default();

    for store_name in &policy.stores {
        let store = pool.get(store_name)?;

        for file in files {
            let destination = &file.relative_destination_path;

            if !policy.overwrite_existing_files && store.exists(destination).await? {
                rollback(pool, &tracker, files).await;
                return Ok(CommitOutcome::Conflict { destination: destination.clone() });
            }

            let contents = tokio::fs::read(&file.absolute_temp_path).await?;

            match store.put(destination, &contents).await {
                Ok(()) => {}
                Err(err) if policy.is_optional(store_name) => {
                    tracing::warn!(store = %store_name, error = %err, "optional store commit failed");
                    continue;
                }
                Err(err) => {
                    tracing::error!(store = %store_name, error = %err, "store commit failed");
                    rollback(pool, &tracker, files).await;
                    return Err(Error::database(
                        format!("failed to commit to store '{store_name}'"),
                        500,
                    ));
                }
            }
        }

        tracker.succeeded.lock().await.push(store_name.clone());
    }

    Ok(CommitOutcome::Committed)
}

/// Delete the corresponding destination on every store already marked
/// successful. Per the spec's §9 open question, the deletion target for
/// rollback is intentionally `base_path + filename` (via `logical_name`),
/// not `base_path + relative_path` as the commit path uses — this is
/// recorded as-is, not reinterpreted, since the spec explicitly calls it
/// out as an asymmetry to preserve rather than fix.
async fn rollback(pool: &StorePool, tracker: &StoreTracker, files: &[TempFileRecord]) {
    let succeeded = tracker.succeeded.lock().await;
    for store_name in succeeded.iter() {
        let Ok(store) = pool.get(store_name) else { continue };
        for file in files {
            if let Err(err) = store.delete(&file.logical_name).await {
                tracing::warn!(
                    store = %store_name,
                    file = %file.logical_name,
                    error = %err,
                    "rollback delete failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeStore {
        written: StdMutex<HashMap<String, Vec<u8>>>,
        fail_put: bool,
    }

    #[async_trait]
    impl FileStore for FakeStore {
        async fn put(&self, destination: &str, contents: &[u8]) -> Result<()> {
            if self.fail_put {
                return Err(Error::generic("simulated write failure"));
            }
            self.written.lock().unwrap().insert(destination.to_string(), contents.to_vec());
            Ok(())
        }

        async fn exists(&self, destination: &str) -> Result<bool> {
            Ok(self.written.lock().unwrap().contains_key(destination))
        }

        async fn delete(&self, destination: &str) -> Result<()> {
            self.written.lock().unwrap().remove(destination);
            Ok(())
        }

        async fn get(&self, destination: &str) -> Result<Vec<u8>> {
            self.written
                .lock()
                .unwrap()
                .get(destination)
                .cloned()
                .ok_or_else(|| Error::generic("no such file"))
        }
    }

    fn record(dir: &std::path::Path, name: &str) -> TempFileRecord {
        let path = dir.join(name);
        std::fs::write(&path, b"hello").unwrap();
        TempFileRecord {
            absolute_temp_path: path,
            logical_name: name.to_string(),
            relative_destination_path: format!("2026/{name}"),
        }
    }

    #[tokio::test]
    async fn commits_to_all_configured_stores() {
        let tmp = tempfile::tempdir().unwrap();
        let mut pool = StorePool::new();
        pool.register("local_a", Arc::new(FakeStore::default()));
        pool.register("local_b", Arc::new(FakeStore::default()));

        let policy = FileCommitPolicy {
            stores: vec!["local_a".to_string(), "local_b".to_string()],
            overwrite_existing_files: false,
            optional_stores: Default::default(),
        };

        let files = vec![record(tmp.path(), "a.pdf")];
        let outcome = commit_staged_files(&pool, &policy, &files).await.unwrap();
        assert!(matches!(outcome, CommitOutcome::Committed));
    }

    #[tokio::test]
    async fn non_optional_failure_rolls_back_successful_stores() {
        let tmp = tempfile::tempdir().unwrap();
        let good = Arc::new(FakeStore::default());
        let mut pool = StorePool::new();
        pool.register("local_a", good.clone());
        pool.register("sftp_b", Arc::new(FakeStore { fail_put: true, ..Default::default() }));

        let policy = FileCommitPolicy {
            stores: vec!["local_a".to_string(), "sftp_b".to_string()],
            overwrite_existing_files: false,
            optional_stores: Default::default(),
        };

        let files = vec![record(tmp.path(), "a.pdf")];
        let result = commit_staged_files(&pool, &policy, &files).await;
        assert!(result.is_err());

        let exists = good.exists("2026/a.pdf").await.unwrap();
        assert!(!exists, "local_a's file should have been rolled back");
    }

    #[tokio::test]
    async fn optional_store_failure_does_not_trigger_rollback() {
        let tmp = tempfile::tempdir().unwrap();
        let good = Arc::new(FakeStore::default());
        let mut pool = StorePool::new();
        pool.register("local_a", good.clone());
        pool.register("optional_b", Arc::new(FakeStore { fail_put: true, ..Default::default() }));

        let mut optional = std::collections::HashSet::new();
        optional.insert("optional_b".to_string());
        let policy = FileCommitPolicy {
            stores: vec!["local_a".to_string(), "optional_b".to_string()],
            overwrite_existing_files: false,
            optional_stores: optional,
        };

        let files = vec![record(tmp.path(), "a.pdf")];
        let outcome = commit_staged_files(&pool, &policy, &files).await.unwrap();
        assert!(matches!(outcome, CommitOutcome::Committed));
        assert!(good.exists("2026/a.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn existing_destination_without_overwrite_is_conflict() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FakeStore::default());
        store.put("2026/a.pdf", b"already there").await.unwrap();

        let mut pool = StorePool::new();
        pool.register("local_a", store);

        let policy = FileCommitPolicy {
            stores: vec!["local_a".to_string()],
            overwrite_existing_files: false,
            optional_stores: Default::default(),
        };

        let files = vec![record(tmp.path(), "a.pdf")];
        let outcome = commit_staged_files(&pool, &policy, &files).await.unwrap();
        assert!(matches!(outcome, CommitOutcome::Conflict { .. }));
    }
}
