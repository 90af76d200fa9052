//! Repository model and the storage collaborators the engine talks to.

mod filesystem;
mod http;

pub use filesystem::FilesystemStorage;
pub use http::{HttpRemoteStorage, ListingStyle, RemoteClientConfig};

use crate::config::DiscoveryConfig;
use crate::context::RequestContext;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid storage path: {0}")]
    InvalidPath(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    #[error("remote item not found: {0}")]
    NotFound(String),

    #[error("Unexpected response code {0} from remote")]
    Status(u16),

    #[error("remote does not provide a directory listing for {0}")]
    ListingUnsupported(String),

    #[error("{0}")]
    Transport(String),

    #[error("remote request timed out")]
    Timeout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    Hosted,
    Proxy,
    Group,
    Shadow,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    #[default]
    Maven2,
    Maven1,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalStatus {
    #[default]
    InService,
    OutOfService,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyMode {
    #[default]
    Allow,
    BlockedAuto,
    BlockedManual,
}

impl ProxyMode {
    pub fn should_proxy(self) -> bool {
        self == ProxyMode::Allow
    }
}

/// A stored file.
#[derive(Clone, Debug, PartialEq)]
pub struct StorageItem {
    pub path: String,
    pub content: Bytes,
    /// Millis since the epoch.
    pub modified: i64,
}

/// One child of a listed directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

impl DirEntry {
    pub fn file(name: impl Into<String>) -> Self {
        DirEntry {
            name: name.into(),
            is_dir: false,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        DirEntry {
            name: name.into(),
            is_dir: true,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }
}

/// Local content of a repository. Paths are normalized, root anchored repository paths.
#[async_trait]
pub trait LocalStorage: Send + Sync {
    async fn retrieve(&self, path: &str) -> Result<Option<StorageItem>, StorageError>;

    async fn store(
        &self,
        ctx: &RequestContext,
        path: &str,
        content: Bytes,
    ) -> Result<(), StorageError>;

    /// Deleting a missing item is not an error.
    async fn delete(&self, ctx: &RequestContext, path: &str) -> Result<(), StorageError>;

    /// Children of a directory; empty when the directory does not exist.
    async fn list(&self, path: &str) -> Result<Vec<DirEntry>, StorageError>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct RemoteFile {
    pub body: Bytes,
    /// Millis since the epoch, when the remote reports it.
    pub last_modified: Option<i64>,
}

/// The remote peer of a proxy repository.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<RemoteFile, RemoteError>;

    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, RemoteError>;
}

pub struct Repository {
    id: String,
    name: String,
    kind: RepositoryKind,
    layout: Layout,
    local: Arc<dyn LocalStorage>,
    remote: Option<Arc<dyn RemoteStorage>>,
    local_status: RwLock<LocalStatus>,
    proxy_mode: RwLock<ProxyMode>,
    members: RwLock<Vec<String>>,
    discovery_config: RwLock<Option<DiscoveryConfig>>,
}

impl Repository {
    pub fn new(id: impl Into<String>, kind: RepositoryKind, local: Arc<dyn LocalStorage>) -> Self {
        let id = id.into();
        Repository {
            name: id.clone(),
            id,
            kind,
            layout: Layout::Maven2,
            local,
            remote: None,
            local_status: RwLock::new(LocalStatus::InService),
            proxy_mode: RwLock::new(ProxyMode::Allow),
            members: RwLock::new(Vec::new()),
            discovery_config: RwLock::new(None),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteStorage>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_members<I, S>(self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_members(members);
        self
    }

    pub fn with_discovery_config(self, config: DiscoveryConfig) -> Self {
        *self.discovery_config.write() = Some(config);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RepositoryKind {
        self.kind
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn local(&self) -> &Arc<dyn LocalStorage> {
        &self.local
    }

    pub fn remote(&self) -> Option<&Arc<dyn RemoteStorage>> {
        self.remote.as_ref()
    }

    pub fn local_status(&self) -> LocalStatus {
        *self.local_status.read()
    }

    pub fn set_local_status(&self, status: LocalStatus) {
        *self.local_status.write() = status;
    }

    pub fn is_in_service(&self) -> bool {
        self.local_status() == LocalStatus::InService
    }

    pub fn proxy_mode(&self) -> ProxyMode {
        *self.proxy_mode.read()
    }

    pub fn set_proxy_mode(&self, mode: ProxyMode) {
        *self.proxy_mode.write() = mode;
    }

    pub fn members(&self) -> Vec<String> {
        self.members.read().clone()
    }

    pub fn set_members<I, S>(&self, members: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.members.write() = members.into_iter().map(Into::into).collect();
    }

    pub fn discovery_config(&self) -> Option<DiscoveryConfig> {
        self.discovery_config.read().clone()
    }

    pub fn set_discovery_config(&self, config: DiscoveryConfig) {
        *self.discovery_config.write() = Some(config);
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("layout", &self.layout)
            .finish()
    }
}

impl std::fmt::Display for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{}\" (id={})", self.name, self.id)
    }
}

/// All repositories known to the process, keyed by id.
#[derive(Default)]
pub struct RepositoryRegistry {
    repositories: RwLock<BTreeMap<String, Arc<Repository>>>,
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, repository: Arc<Repository>) {
        self.repositories
            .write()
            .insert(repository.id().to_string(), repository);
    }

    pub fn unregister(&self, id: &str) -> Option<Arc<Repository>> {
        self.repositories.write().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Repository>> {
        self.repositories.read().get(id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Repository>> {
        self.repositories.read().values().cloned().collect()
    }

    /// Groups having `id` as a direct member.
    pub fn groups_of(&self, id: &str) -> Vec<Arc<Repository>> {
        self.repositories
            .read()
            .values()
            .filter(|r| r.kind() == RepositoryKind::Group && r.members().iter().any(|m| m == id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::MemoryStorage;

    #[test]
    fn test_groups_of() {
        let registry = RepositoryRegistry::new();
        let storage = Arc::new(MemoryStorage::new());
        registry.register(Arc::new(Repository::new(
            "releases",
            RepositoryKind::Hosted,
            storage.clone(),
        )));
        registry.register(Arc::new(
            Repository::new("public", RepositoryKind::Group, storage.clone())
                .with_members(["releases", "central"]),
        ));
        registry.register(Arc::new(
            Repository::new("other", RepositoryKind::Group, storage).with_members(["central"]),
        ));

        let groups: Vec<String> = registry
            .groups_of("releases")
            .iter()
            .map(|g| g.id().to_string())
            .collect();
        assert_eq!(groups, vec!["public".to_string()]);
        assert_eq!(registry.groups_of("central").len(), 2);
        assert!(registry.unregister("public").is_some());
        assert!(registry.get("public").is_none());
    }

    #[test]
    fn test_proxy_mode() {
        assert!(ProxyMode::Allow.should_proxy());
        assert!(!ProxyMode::BlockedAuto.should_proxy());
        assert!(!ProxyMode::BlockedManual.should_proxy());
    }
}
