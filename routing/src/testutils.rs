//! In-memory collaborators for tests.

use crate::context::RequestContext;
use crate::storage::{
    DirEntry, LocalStorage, RemoteError, RemoteFile, RemoteStorage, Repository, RepositoryKind,
    StorageError, StorageItem,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Lists the direct children of `dir` given a flat set of file paths.
fn children_of<'a>(paths: impl Iterator<Item = &'a String>, dir: &str) -> Vec<DirEntry> {
    let prefix = if dir == "/" {
        "/".to_string()
    } else {
        format!("{}/", dir.trim_end_matches('/'))
    };
    let mut children = BTreeMap::new();
    for path in paths {
        let Some(rest) = path.strip_prefix(&prefix) else {
            continue;
        };
        match rest.split_once('/') {
            Some((name, _)) => children.insert(name.to_string(), true),
            None => children.insert(rest.to_string(), false),
        };
    }
    children
        .into_iter()
        .map(|(name, is_dir)| DirEntry { name, is_dir })
        .collect()
}

#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<BTreeMap<String, StorageItem>>,
    contexts: Mutex<HashMap<String, RequestContext>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files(paths: &[&str]) -> Self {
        let storage = Self::new();
        for path in paths {
            storage.put(path, Bytes::from_static(b"content"));
        }
        storage
    }

    pub fn put(&self, path: &str, content: Bytes) {
        self.files.lock().insert(
            path.to_string(),
            StorageItem {
                path: path.to_string(),
                content,
                modified: crate::now_millis(),
            },
        );
    }

    pub fn remove(&self, path: &str) {
        self.files.lock().remove(path);
    }

    /// Context of the last store or delete against `path`.
    pub fn last_context(&self, path: &str) -> Option<RequestContext> {
        self.contexts.lock().get(path).cloned()
    }
}

#[async_trait]
impl LocalStorage for MemoryStorage {
    async fn retrieve(&self, path: &str) -> Result<Option<StorageItem>, StorageError> {
        Ok(self.files.lock().get(path).cloned())
    }

    async fn store(
        &self,
        ctx: &RequestContext,
        path: &str,
        content: Bytes,
    ) -> Result<(), StorageError> {
        self.put(path, content);
        self.contexts.lock().insert(path.to_string(), ctx.clone());
        Ok(())
    }

    async fn delete(&self, ctx: &RequestContext, path: &str) -> Result<(), StorageError> {
        let prefix = format!("{path}/");
        self.files
            .lock()
            .retain(|p, _| p != path && !p.starts_with(&prefix));
        self.contexts.lock().insert(path.to_string(), ctx.clone());
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<DirEntry>, StorageError> {
        Ok(children_of(self.files.lock().keys(), path))
    }
}

/// A remote whose answers are set up by the test.
#[derive(Default)]
pub struct ScriptedRemote {
    files: Mutex<HashMap<String, Result<RemoteFile, RemoteError>>>,
    tree: Mutex<Vec<String>>,
    // path -> (error, remaining failures)
    listing_failures: Mutex<HashMap<String, (RemoteError, usize)>>,
    delay: Mutex<Duration>,
    fetch_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve_file(&self, path: &str, body: impl Into<Bytes>, last_modified: Option<i64>) {
        self.files.lock().insert(
            path.to_string(),
            Ok(RemoteFile {
                body: body.into(),
                last_modified,
            }),
        );
    }

    pub fn fail_file(&self, path: &str, error: RemoteError) {
        self.files.lock().insert(path.to_string(), Err(error));
    }

    /// Makes every path browsable through directory listings.
    pub fn serve_tree(&self, paths: &[&str]) {
        self.tree
            .lock()
            .extend(paths.iter().map(|p| p.to_string()));
    }

    pub fn fail_listing(&self, path: &str, error: RemoteError, times: usize) {
        self.listing_failures
            .lock()
            .insert(path.to_string(), (error, times));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RemoteStorage for ScriptedRemote {
    async fn fetch(&self, path: &str) -> Result<RemoteFile, RemoteError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        // the answer is fixed when the request is made
        let answer = self
            .files
            .lock()
            .get(path)
            .cloned()
            .unwrap_or_else(|| Err(RemoteError::NotFound(path.to_string())));
        self.pause().await;
        answer
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some((error, remaining)) = self.listing_failures.lock().get_mut(path)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(error.clone());
        }
        let tree = self.tree.lock();
        let children = children_of(tree.iter(), path);
        let is_known = path == "/" || tree.iter().any(|p| p.starts_with(&format!("{path}/")));
        if children.is_empty() && !is_known {
            return Err(RemoteError::NotFound(path.to_string()));
        }
        Ok(children)
    }
}

pub fn hosted(id: &str) -> (Arc<Repository>, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let repository = Repository::new(id, RepositoryKind::Hosted, storage.clone());
    (Arc::new(repository), storage)
}

pub fn proxy(id: &str) -> (Arc<Repository>, Arc<MemoryStorage>, Arc<ScriptedRemote>) {
    let storage = Arc::new(MemoryStorage::new());
    let remote = Arc::new(ScriptedRemote::new());
    let repository =
        Repository::new(id, RepositoryKind::Proxy, storage.clone()).with_remote(remote.clone());
    (Arc::new(repository), storage, remote)
}

pub fn group(id: &str, members: &[&str]) -> Arc<Repository> {
    let storage = Arc::new(MemoryStorage::new());
    Arc::new(
        Repository::new(id, RepositoryKind::Group, storage).with_members(members.iter().copied()),
    )
}

/// Polls `condition` until it holds, panicking after a few seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
