use super::{RemoteStrategy, StrategyError, StrategyResult, classify};
use crate::prefix::PrefixSet;
use crate::storage::{DirEntry, RemoteError, RemoteStorage, Repository};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

enum ListError {
    Cancelled,
    Remote(RemoteError),
}

/// Walks the remote directory listings down to a fixed depth.
pub struct RemoteScrapeStrategy {
    depth: usize,
    attempts: usize,
}

impl RemoteScrapeStrategy {
    pub const ID: &'static str = "scrape";

    pub fn new(depth: usize, attempts: usize) -> Self {
        RemoteScrapeStrategy {
            depth,
            attempts: attempts.max(1),
        }
    }

    async fn list(
        &self,
        remote: &dyn RemoteStorage,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<DirEntry>, ListError> {
        let mut last_error = RemoteError::Timeout;
        for attempt in 1..=self.attempts {
            if cancel.is_cancelled() {
                return Err(ListError::Cancelled);
            }
            let listed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ListError::Cancelled),
                listed = remote.list_directory(path) => listed,
            };
            match listed {
                Ok(children) => return Ok(children),
                // retrying will not change these
                Err(e @ (RemoteError::NotFound(_) | RemoteError::ListingUnsupported(_))) => {
                    return Err(ListError::Remote(e));
                }
                Err(e) => {
                    tracing::debug!(path, attempt, "Listing remote directory failed: {e}");
                    last_error = e;
                }
            }
        }
        Err(ListError::Remote(last_error))
    }
}

#[async_trait]
impl RemoteStrategy for RemoteScrapeStrategy {
    fn id(&self) -> &'static str {
        Self::ID
    }

    async fn discover(
        &self,
        repository: &Repository,
        cancel: &CancellationToken,
    ) -> Result<StrategyResult, StrategyError> {
        let remote = repository
            .remote()
            .ok_or_else(|| StrategyError::Failed("Repository has no remote storage.".into()))?;

        let root = match self.list(remote.as_ref(), "/", cancel).await {
            Ok(root) => root,
            Err(ListError::Cancelled) => return Err(StrategyError::Cancelled),
            Err(ListError::Remote(e)) => {
                return Err(StrategyError::from_remote("Could not scrape remote", e));
            }
        };

        let mut entries = PrefixSet::new();
        if self.depth == 0 {
            if root.iter().any(|c| !c.is_hidden()) {
                entries.insert("/");
            }
        } else {
            let mut pending = classify("/", &root, self.depth, &mut entries);
            while let Some(dir) = pending.pop() {
                match self.list(remote.as_ref(), &dir, cancel).await {
                    Ok(children) if children.is_empty() => {
                        entries.insert(&dir);
                    }
                    Ok(children) => {
                        pending.extend(classify(&dir, &children, self.depth, &mut entries));
                    }
                    Err(ListError::Cancelled) => return Err(StrategyError::Cancelled),
                    Err(ListError::Remote(e)) => {
                        // keep the whole subtree reachable
                        tracing::debug!(
                            repository = %repository.id(),
                            path = %dir,
                            "Giving up scraping subtree: {e}"
                        );
                        entries.insert(&dir);
                    }
                }
            }
        }

        if entries.is_empty() {
            return Err(StrategyError::Failed(
                "Remote is empty, nothing to scrape.".into(),
            ));
        }
        Ok(StrategyResult {
            message: format!(
                "Remote scraped successfully, {} entries found.",
                entries.len()
            ),
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::proxy;
    use std::time::Duration;

    const TREE: &[&str] = &[
        "/archetype-catalog.xml",
        "/org/apache/maven/maven-core/3.0/maven-core-3.0.jar",
        "/org/sonatype/nexus/nexus-core/2.0/nexus-core-2.0.jar",
        "/com/example/foo/1.0/foo-1.0.jar",
        "/com/example/bar/1.0/bar-1.0.jar",
        "/.index/nexus-maven-repository-index.gz",
    ];

    #[tokio::test]
    async fn test_scrape_to_depth() {
        let (repository, _, remote) = proxy("central");
        remote.serve_tree(TREE);

        let result = RemoteScrapeStrategy::new(2, 2)
            .discover(&repository, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            result.entries.to_vec(),
            vec![
                "/archetype-catalog.xml".to_string(),
                "/com/example".to_string(),
                "/org/apache".to_string(),
                "/org/sonatype".to_string(),
            ]
        );
        assert_eq!(result.message, "Remote scraped successfully, 4 entries found.");
        // root, /com and /org only
        assert_eq!(remote.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_failing_subtree_is_kept_whole() {
        let (repository, _, remote) = proxy("central");
        remote.serve_tree(TREE);
        remote.fail_listing("/org", RemoteError::Timeout, 5);

        let result = RemoteScrapeStrategy::new(2, 2)
            .discover(&repository, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.entries.contains("/org"));
        assert!(result.entries.covers("/org/apache/maven"));
        assert!(result.entries.contains("/com/example"));
    }

    #[tokio::test]
    async fn test_retries_directory() {
        let (repository, _, remote) = proxy("central");
        remote.serve_tree(TREE);
        remote.fail_listing("/org", RemoteError::Transport("connection reset".into()), 1);

        let result = RemoteScrapeStrategy::new(2, 2)
            .discover(&repository, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.entries.contains("/org/apache"));
        assert!(!result.entries.contains("/org"));
    }

    #[tokio::test]
    async fn test_root_failure_fails_strategy() {
        let (repository, _, remote) = proxy("central");
        remote.fail_listing("/", RemoteError::ListingUnsupported("/".into()), 1);
        assert!(matches!(
            RemoteScrapeStrategy::new(2, 2)
                .discover(&repository, &CancellationToken::new())
                .await,
            Err(StrategyError::Failed(_))
        ));

        let (repository, _, remote) = proxy("central");
        remote.fail_listing("/", RemoteError::Status(503), 2);
        assert!(matches!(
            RemoteScrapeStrategy::new(2, 2)
                .discover(&repository, &CancellationToken::new())
                .await,
            Err(StrategyError::Failed(message)) if message.contains("503")
        ));
    }

    #[tokio::test]
    async fn test_empty_remote() {
        let (repository, _, _) = proxy("central");
        assert_eq!(
            RemoteScrapeStrategy::new(2, 2)
                .discover(&repository, &CancellationToken::new())
                .await,
            Err(StrategyError::Failed("Remote is empty, nothing to scrape.".into()))
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_walk() {
        let (repository, _, remote) = proxy("central");
        remote.serve_tree(TREE);
        remote.set_delay(Duration::from_millis(50));

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(70)).await;
            canceller.cancel();
        });
        let result = RemoteScrapeStrategy::new(2, 2)
            .discover(&repository, &cancel)
            .await;
        assert_eq!(result, Err(StrategyError::Cancelled));
        // the walk stopped within the directory in flight
        assert!(remote.list_calls() <= 2);
    }
}
