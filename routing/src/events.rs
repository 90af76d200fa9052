use crate::config::DiscoveryConfig;
use crate::storage::Repository;
use std::sync::Arc;

/// Lifecycle and content events of repositories, delivered to [`crate::Manager::on_event`].
#[derive(Clone, Debug)]
pub enum RepositoryEvent {
    Added(Arc<Repository>),
    Removed(Arc<Repository>),
    /// The repository configuration was changed and saved.
    ConfigurationChanged {
        repository: Arc<Repository>,
        remote_url_changed: bool,
        local_status_changed: bool,
        proxy_mode_changed: bool,
    },
    GroupMembersChanged(Arc<Repository>),
    ItemStored(ItemEvent),
    ItemDeleted(ItemEvent),
}

#[derive(Clone, Debug)]
pub struct ItemEvent {
    pub repository: Arc<Repository>,
    pub path: String,
    /// False for collection (directory) items.
    pub is_file: bool,
    pub context: crate::context::RequestContext,
}

/// Broadcast by the manager when routing state visible to others changes.
#[derive(Clone, Debug, PartialEq)]
pub enum RoutingEvent {
    PrefixFilePublished { repository: String },
    PrefixFileUnpublished { repository: String },
    /// The discovery configuration of a proxy changed and should be persisted.
    DiscoveryConfigChanged {
        repository: String,
        config: DiscoveryConfig,
    },
}
