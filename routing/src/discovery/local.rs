use super::{StrategyError, classify};
use crate::prefix::PrefixSet;
use crate::storage::{LocalStorage, StorageError};
use tokio_util::sync::CancellationToken;

/// Builds a prefix list from what a repository holds in its local storage.
#[derive(Clone, Debug)]
pub struct LocalContentDiscoverer {
    depth: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum LocalDiscoveryError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Strategy(#[from] StrategyError),
}

impl LocalContentDiscoverer {
    pub fn new(depth: usize) -> Self {
        LocalContentDiscoverer { depth }
    }

    pub async fn discover(
        &self,
        storage: &dyn LocalStorage,
        cancel: &CancellationToken,
    ) -> Result<PrefixSet, LocalDiscoveryError> {
        let mut entries = PrefixSet::new();
        let root = storage.list("/").await?;
        if self.depth == 0 {
            if root.iter().any(|c| !c.is_hidden()) {
                entries.insert("/");
            }
            return Ok(entries);
        }

        let mut pending = classify("/", &root, self.depth, &mut entries);
        while let Some(dir) = pending.pop() {
            if cancel.is_cancelled() {
                return Err(StrategyError::Cancelled.into());
            }
            let children = storage.list(&dir).await?;
            pending.extend(classify(&dir, &children, self.depth, &mut entries));
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::MemoryStorage;

    #[tokio::test]
    async fn test_discover_local_content() {
        let storage = MemoryStorage::with_files(&[
            "/.meta/prefixes.txt",
            "/org/apache/foo/1.0/foo-1.0.jar",
            "/org/apache/bar/1.0/bar-1.0.jar",
            "/com/example/baz/2.0/baz-2.0.pom",
            "/archetype-catalog.xml",
        ]);
        let entries = LocalContentDiscoverer::new(2)
            .discover(&storage, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            entries.to_vec(),
            vec![
                "/archetype-catalog.xml".to_string(),
                "/com/example".to_string(),
                "/org/apache".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_and_depth_zero() {
        let storage = MemoryStorage::with_files(&["/.meta/prefixes.txt"]);
        let entries = LocalContentDiscoverer::new(2)
            .discover(&storage, &CancellationToken::new())
            .await
            .unwrap();
        assert!(entries.is_empty());

        let storage = MemoryStorage::with_files(&["/org/foo.jar"]);
        let entries = LocalContentDiscoverer::new(0)
            .discover(&storage, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(entries.to_vec(), vec!["/".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled() {
        let storage = MemoryStorage::with_files(&["/org/apache/foo/1.0/foo-1.0.jar"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            LocalContentDiscoverer::new(2).discover(&storage, &cancel).await,
            Err(LocalDiscoveryError::Strategy(StrategyError::Cancelled))
        ));
    }
}
