use crate::Manager;
use crate::context::{ContextFlag, ResourceRequest};
use crate::metrics_defs::{FILTER_ALLOWED, FILTER_REJECTED};
use crate::prefix::normalize_path;
use crate::storage::Repository;

/// Decides whether a proxy repository should ask its remote for a path.
///
/// Reads only the in-memory snapshot kept by the [`Manager`], so it never
/// blocks on I/O. Without a supported prefix list every request is allowed.
#[derive(Clone)]
pub struct ProxyRequestFilter {
    manager: Manager,
}

impl ProxyRequestFilter {
    pub fn new(manager: Manager) -> Self {
        ProxyRequestFilter { manager }
    }

    pub fn allowed(&self, repository: &Repository, request: &ResourceRequest) -> bool {
        if request.context.has(ContextFlag::NotFilteringSubject) {
            return true;
        }
        let published = self.manager.get_prefix_source_for(repository);
        match published.entries() {
            Some(entries) => entries.covers(&normalize_path(&request.path)),
            None => true,
        }
    }

    /// Like [`Self::allowed`], but marks a rejected request and records the decision.
    pub fn filter_request(&self, repository: &Repository, request: &mut ResourceRequest) -> bool {
        let allowed = self.allowed(repository, request);
        if allowed {
            shared::counter!(FILTER_ALLOWED).increment(1);
        } else {
            request.context.set(ContextFlag::FilterRejected);
            shared::counter!(FILTER_REJECTED).increment(1);
            tracing::debug!(repository = %repository, path = %request.path, "Remote request rejected by prefix list");
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MAGIC;
    use crate::config::Config;
    use crate::prefix::{ListPrefixSource, PrefixSet};
    use crate::storage::RepositoryRegistry;
    use crate::testutils::{hosted, proxy, wait_until};
    use bytes::Bytes;
    use std::sync::Arc;

    fn setup(repositories: &[&Arc<Repository>]) -> (Manager, ProxyRequestFilter) {
        let registry = Arc::new(RepositoryRegistry::new());
        for repository in repositories {
            registry.register((*repository).clone());
        }
        let manager = Manager::new(Config::default(), registry);
        let filter = ProxyRequestFilter::new(manager.clone());
        (manager, filter)
    }

    #[tokio::test]
    async fn test_fails_open_without_prefix_list() {
        let (repository, _, _) = proxy("central");
        let (manager, filter) = setup(&[&repository]);

        assert!(filter.allowed(&repository, &ResourceRequest::new("/org/foo.jar")));

        manager.unpublish(&repository).await.unwrap();
        assert!(filter.allowed(&repository, &ResourceRequest::new("/org/foo.jar")));
    }

    #[tokio::test]
    async fn test_filters_by_published_list() {
        let (repository, _, _) = proxy("central");
        let (manager, filter) = setup(&[&repository]);
        manager
            .publish(
                &repository,
                &ListPrefixSource::new(PrefixSet::from_entries(["/org/apache"])),
            )
            .await
            .unwrap();

        assert!(filter.allowed(&repository, &ResourceRequest::new("/org/apache/foo/foo.jar")));
        assert!(filter.allowed(&repository, &ResourceRequest::new("org/apache/")));
        assert!(!filter.allowed(&repository, &ResourceRequest::new("/org/apachefoo/foo.jar")));

        let mut rejected = ResourceRequest::new("/com/example/bar.jar");
        assert!(!filter.filter_request(&repository, &mut rejected));
        assert!(rejected.context.has(ContextFlag::FilterRejected));

        let mut exempt = ResourceRequest::new("/com/example/bar.jar")
            .with_flag(ContextFlag::NotFilteringSubject);
        assert!(filter.filter_request(&repository, &mut exempt));
        assert!(!exempt.context.has(ContextFlag::FilterRejected));
    }

    #[tokio::test]
    async fn test_stored_item_becomes_routable() {
        let (releases, storage) = hosted("releases");
        let (central, _, remote) = proxy("central");
        let (manager, filter) = setup(&[&releases, &central]);

        manager.update_prefix_file(&releases).unwrap();
        wait_until(|| manager.get_prefix_source_for(&releases).is_supported()).await;
        wait_until(|| !manager.is_update_running_for(&releases)).await;

        let item = "/org/apache/foo/1.0/foo-1.0.jar";
        storage.put(item, Bytes::from_static(b"jar"));
        assert!(manager.offer_entry(&releases, item).await.unwrap());
        let published = manager.get_prefix_source_for(&releases);
        assert!(published.entries().unwrap().covers("/org/apache/foo"));

        // the proxy mirrors the hosted layout through the remote prefix file
        let content = manager
            .file_prefix_source_for(&releases)
            .load()
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(content.content, crate::codec::PrefixFile::Supported(_)));
        remote.serve_file("/.meta/prefixes.txt", format!("{MAGIC}\n/org/apache\n"), None);
        manager
            .force_proxy_quick_update_prefix_file(&central)
            .await
            .unwrap();

        assert!(filter.allowed(&central, &ResourceRequest::new("/org/apache/foo/1.0/foo-1.0.pom")));
        assert!(!filter.allowed(&central, &ResourceRequest::new("/com/other/bar/1.0/bar.jar")));
    }
}
