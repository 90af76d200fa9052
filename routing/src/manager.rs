//! The routing manager: owns per-repository prefix state and schedules the
//! jobs that keep published prefix files current.
//!
//! Every update runs as a background job keyed by repository id, at most one
//! per repository. A job computes a new prefix list (local scan for hosted,
//! remote discovery for proxies, member union for groups) and then, holding
//! the repository's write lock, either publishes it or writes the noscrape
//! marker. Publishing into a repository also re-evaluates the groups that
//! contain it.

use crate::codec::PrefixCodec;
use crate::config::{Config, DiscoveryConfig};
use crate::context::ContextFlag;
use crate::discovery::{
    LocalContentDiscoverer, LocalDiscoveryError, RemoteContentDiscoverer,
    RemotePrefixFileStrategy, RemoteScrapeStrategy, RemoteStrategy, StrategyError,
};
use crate::errors::{Result, RoutingError};
use crate::events::{ItemEvent, RepositoryEvent, RoutingEvent};
use crate::file_source::FilePrefixSource;
use crate::metrics_defs::{
    DISCOVERY_DURATION, DISCOVERY_RUNS, PREFIX_FILE_PUBLISHED, PREFIX_FILE_UNPUBLISHED,
};
use crate::modifier::PrefixModifier;
use crate::now_millis;
use crate::prefix::{PrefixSet, PrefixSource, WritablePrefixSource};
use crate::scheduler::ConstrainedExecutor;
use crate::snapshot::PrefixSnapshot;
use crate::status::{
    DStatus, DiscoveryStatus, PStatus, PublishingStatus, RoutingStatus, StatusError,
};
use crate::storage::{Layout, Repository, RepositoryKind, RepositoryRegistry};
use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Why a job stopped without committing.
#[derive(Debug)]
enum UpdateError {
    Cancelled,
    Routing(RoutingError),
}

impl From<RoutingError> for UpdateError {
    fn from(error: RoutingError) -> Self {
        UpdateError::Routing(error)
    }
}

impl From<StatusError> for UpdateError {
    fn from(error: StatusError) -> Self {
        UpdateError::Routing(error.into())
    }
}

#[derive(Clone, Copy, Debug)]
enum Modification {
    Offer,
    Revoke,
}

/// Routing state of a single repository.
#[derive(Default)]
struct RepositoryState {
    published: ArcSwap<PrefixSnapshot>,
    discovery: ArcSwapOption<DiscoveryStatus>,
    /// Serializes writes of the prefix file.
    write_lock: tokio::sync::Mutex<()>,
}

struct ManagerInner {
    config: Config,
    codec: PrefixCodec,
    registry: Arc<RepositoryRegistry>,
    remote_discoverer: RemoteContentDiscoverer,
    quick_strategies: Vec<Arc<dyn RemoteStrategy>>,
    local_discoverer: LocalContentDiscoverer,
    modifier: PrefixModifier,
    executor: ConstrainedExecutor,
    states: RwLock<HashMap<String, Arc<RepositoryState>>>,
    events: broadcast::Sender<RoutingEvent>,
    updater: Mutex<Option<CancellationToken>>,
    // Set once the periodic updater completed its first pass.
    updater_ran: AtomicBool,
}

#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerInner>,
}

impl Manager {
    pub fn new(config: Config, registry: Arc<RepositoryRegistry>) -> Self {
        let codec = PrefixCodec::new(&config);
        let prefix_file: Arc<dyn RemoteStrategy> = Arc::new(RemotePrefixFileStrategy::new(
            codec.clone(),
            config.remote_prefix_file_path.clone(),
        ));
        let scrape: Arc<dyn RemoteStrategy> = Arc::new(RemoteScrapeStrategy::new(
            config.remote_scrape_depth,
            config.scrape_directory_attempts,
        ));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Manager {
            inner: Arc::new(ManagerInner {
                remote_discoverer: RemoteContentDiscoverer::new(vec![
                    prefix_file.clone(),
                    scrape,
                ]),
                quick_strategies: vec![prefix_file],
                local_discoverer: LocalContentDiscoverer::new(config.local_scrape_depth),
                modifier: PrefixModifier::new(config.local_scrape_depth),
                executor: ConstrainedExecutor::new(config.max_concurrent_jobs),
                states: RwLock::new(HashMap::new()),
                events,
                updater: Mutex::new(None),
                updater_ran: AtomicBool::new(false),
                codec,
                registry,
                config,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<RepositoryRegistry> {
        &self.inner.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoutingEvent> {
        self.inner.events.subscribe()
    }

    /// Loads the published prefix files of all repositories and starts the
    /// periodic updater. Does nothing when the feature is inactive.
    pub async fn startup(&self) {
        if !self.inner.config.feature_active {
            tracing::info!("Automatic routing is disabled");
            return;
        }

        for repository in self.inner.registry.all() {
            if !self.is_maven_repository_supported(&repository) {
                continue;
            }
            match self.refresh_published(&repository).await {
                Ok(snapshot) if snapshot.is_supported() => {
                    self.emit(RoutingEvent::PrefixFilePublished {
                        repository: repository.id().to_string(),
                    })
                }
                Ok(snapshot) if !snapshot.is_missing() => {
                    self.emit(RoutingEvent::PrefixFileUnpublished {
                        repository: repository.id().to_string(),
                    })
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(repository = %repository, "Could not load prefix file: {e}")
                }
            }
        }

        let token = CancellationToken::new();
        if let Some(previous) = self.inner.updater.lock().replace(token.clone()) {
            previous.cancel();
        }
        let manager = self.clone();
        tokio::spawn(async move { manager.run_periodic_updater(token).await });
        tracing::info!(
            interval_secs = self.inner.config.update_check_interval_secs,
            "Automatic routing started"
        );
    }

    /// Stops the periodic updater and cancels all running jobs.
    pub fn shutdown(&self) {
        if let Some(token) = self.inner.updater.lock().take() {
            token.cancel();
        }
        self.inner.executor.cancel_all();
        tracing::info!("Automatic routing stopped");
    }

    async fn run_periodic_updater(&self, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.inner.config.update_check_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    self.may_update_all().await;
                    self.inner.updater_ran.store(true, Ordering::Relaxed);
                }
            }
        }
        tracing::debug!("Periodic prefix file updater stopped");
    }

    /// Maven2 hosted, proxy and group repositories take part in routing.
    pub fn is_maven_repository_supported(&self, repository: &Repository) -> bool {
        repository.kind() != RepositoryKind::Shadow && repository.layout() == Layout::Maven2
    }

    /// Sets up the prefix file of a newly added repository. Hosted and group
    /// repositories get an update job; proxies get the noscrape marker until
    /// their first discovery, without contacting the remote.
    pub async fn initialize_prefix_file(&self, repository: &Arc<Repository>) -> Result<()> {
        self.check_supported(repository)?;
        tracing::debug!(repository = %repository, "Initializing prefix file");

        if repository.kind() == RepositoryKind::Proxy {
            let state = self.state(repository);
            state.discovery.store(None);
            let _guard = state.write_lock.lock().await;
            let file = self.prefix_file_of(repository);
            if file.exists().await {
                self.refresh_published(repository).await?;
            } else {
                self.unpublish_locked(repository).await?;
            }
            return Ok(());
        }

        if let Err(e) = self.update_prefix_file(repository) {
            tracing::warn!(repository = %repository, "Problem during prefix file initialisation: {e}");
            if let Err(e) = self.unpublish(repository).await {
                tracing::warn!(repository = %repository, "Could not unpublish prefix file: {e}");
            }
            return Err(e);
        }
        tracing::info!(repository = %repository, "Initializing non-existing prefix file of newly added {repository}");
        Ok(())
    }

    /// Spawns an update job unless one is already running for the repository.
    /// Returns whether the job was spawned.
    pub fn update_prefix_file(&self, repository: &Arc<Repository>) -> Result<bool> {
        self.check_update_conditions(repository)?;
        Ok(self.spawn_update(repository, false))
    }

    /// Spawns an update job, cancelling any running one for the repository.
    /// Returns whether a running job was cancelled.
    pub fn force_update_prefix_file(&self, repository: &Arc<Repository>) -> Result<bool> {
        self.check_update_conditions(repository)?;
        Ok(self.spawn_update(repository, true))
    }

    /// Cancels any running job of the proxy and updates it in place from the
    /// remote prefix file alone, without scraping.
    pub async fn force_proxy_quick_update_prefix_file(
        &self,
        repository: &Arc<Repository>,
    ) -> Result<()> {
        if repository.kind() != RepositoryKind::Proxy {
            return Err(RoutingError::NotAProxy(repository.id().to_string()));
        }
        self.check_update_conditions(repository)?;
        if self.inner.executor.cancel_running_with_key(repository.id()) {
            tracing::debug!(repository = %repository, "Cancelled running job for quick update");
        }

        let token = CancellationToken::new();
        let result = async {
            let (entries, status) = self
                .compute_proxy(repository, Some(self.inner.quick_strategies.as_slice()), &token)
                .await?;
            self.commit(repository, entries, status, &token).await
        }
        .await;

        match result {
            Ok(()) | Err(UpdateError::Cancelled) => Ok(()),
            Err(UpdateError::Routing(e)) => {
                tracing::warn!(repository = %repository, "Quick update of prefix file failed: {e}");
                if let Err(e) = self.unpublish(repository).await {
                    tracing::warn!(repository = %repository, "Could not unpublish prefix file: {e}");
                }
                Err(e)
            }
        }
    }

    /// Adds the directory of a newly stored item to a hosted repository's
    /// published list. Returns whether the published file changed.
    pub async fn offer_entry(&self, repository: &Arc<Repository>, item_path: &str) -> Result<bool> {
        self.modify_entries(repository, item_path, Modification::Offer)
            .await
    }

    /// Drops the entries of a deleted item from a hosted repository's published
    /// list once nothing is left under them. Returns whether the file changed.
    pub async fn revoke_entry(&self, repository: &Arc<Repository>, item_path: &str) -> Result<bool> {
        self.modify_entries(repository, item_path, Modification::Revoke)
            .await
    }

    async fn modify_entries(
        &self,
        repository: &Arc<Repository>,
        item_path: &str,
        modification: Modification,
    ) -> Result<bool> {
        if repository.kind() != RepositoryKind::Hosted
            || !self.is_maven_repository_supported(repository)
        {
            return Ok(false);
        }
        // a running job republishes from scratch anyway
        if self.inner.executor.has_running_with_key(repository.id()) {
            return Ok(false);
        }

        let state = self.state(repository);
        let _guard = state.write_lock.lock().await;
        let Some(mut entries) = self
            .prefix_file_of(repository)
            .load()
            .await?
            .and_then(|loaded| PrefixSnapshot::from(Some(loaded)).entries().cloned())
        else {
            return Ok(false);
        };
        let modifier = &self.inner.modifier;
        let changed = match modification {
            Modification::Offer => modifier.offer(&mut entries, item_path),
            Modification::Revoke => {
                modifier
                    .revoke(&mut entries, item_path, repository.local().as_ref())
                    .await
            }
        };
        if !changed {
            return Ok(false);
        }
        self.publish_locked(repository, &entries).await?;
        Ok(true)
    }

    /// The published prefix list of a repository as last written or loaded.
    /// Never touches storage.
    pub fn get_prefix_source_for(&self, repository: &Repository) -> Arc<PrefixSnapshot> {
        self.state(repository).published.load_full()
    }

    /// The prefix file of a repository in its local storage.
    pub fn file_prefix_source_for(&self, repository: &Repository) -> FilePrefixSource {
        self.prefix_file_of(repository)
    }

    /// Writes the entries of `source` as the repository's prefix file, or the
    /// noscrape marker when the source is unsupported.
    pub async fn publish(&self, repository: &Arc<Repository>, source: &dyn PrefixSource) -> Result<()> {
        let state = self.state(repository);
        let _guard = state.write_lock.lock().await;
        match source.read_entries().await? {
            Some(entries) => {
                self.publish_locked(repository, &PrefixSet::from_entries(entries))
                    .await
            }
            None => self.unpublish_locked(repository).await,
        }
    }

    /// Replaces the prefix file with the noscrape marker.
    pub async fn unpublish(&self, repository: &Arc<Repository>) -> Result<()> {
        let state = self.state(repository);
        let _guard = state.write_lock.lock().await;
        self.unpublish_locked(repository).await
    }

    pub fn get_status_for(&self, repository: &Repository) -> Result<RoutingStatus> {
        let published = self.get_prefix_source_for(repository);
        let publishing = match &*published {
            PrefixSnapshot::Supported { last_modified, .. } => PublishingStatus::new(
                PStatus::Published,
                "Prefix file published successfully.",
                *last_modified,
                Some(self.inner.config.local_prefix_file_path.clone()),
            ),
            _ => PublishingStatus::new(
                PStatus::NotPublished,
                self.not_published_message(repository),
                -1,
                None,
            ),
        };
        Ok(RoutingStatus::new(
            publishing,
            self.discovery_status(repository)?,
        ))
    }

    fn not_published_message(&self, repository: &Repository) -> String {
        if repository.layout() != Layout::Maven2 {
            return "Unsupported repository format (only Maven2 format is supported).".into();
        }
        match repository.kind() {
            RepositoryKind::Group => {
                let missing: Vec<String> = repository
                    .members()
                    .iter()
                    .filter_map(|id| self.inner.registry.get(id))
                    .filter(|member| !self.get_prefix_source_for(member).is_supported())
                    .map(|member| member.name().to_string())
                    .collect();
                if missing.is_empty() {
                    "Publishing not possible, check logs for more details.".into()
                } else {
                    format!(
                        "Publishing not possible, following members have no published prefix file: {}",
                        missing.join(", ")
                    )
                }
            }
            RepositoryKind::Proxy => {
                if self.get_remote_discovery_config(repository).is_enabled() {
                    "Discovery in progress or unable to discover remote content (see discovery status).".into()
                } else {
                    "Remote discovery not enabled.".into()
                }
            }
            RepositoryKind::Hosted => "Check logs for more details.".into(),
            RepositoryKind::Shadow => {
                "Unsupported repository type (only hosted, proxy and groups are supported).".into()
            }
        }
    }

    fn discovery_status(&self, repository: &Repository) -> Result<DiscoveryStatus> {
        if repository.kind() != RepositoryKind::Proxy {
            return Ok(DiscoveryStatus::not_yet_run(DStatus::NotAProxy)?);
        }
        if !self.get_remote_discovery_config(repository).is_enabled() {
            return Ok(DiscoveryStatus::not_yet_run(DStatus::Disabled)?);
        }
        if self.inner.executor.has_running_with_key(repository.id()) {
            return Ok(DiscoveryStatus::not_yet_run(DStatus::EnabledInProgress)?);
        }
        if let Some(status) = self.state(repository).discovery.load_full() {
            return Ok((*status).clone());
        }
        if !repository.is_in_service() {
            return Ok(DiscoveryStatus::ran(
                DStatus::EnabledNotPossible,
                "none",
                "Repository is out of service.",
                now_millis(),
            )?);
        }
        Ok(DiscoveryStatus::not_yet_run(DStatus::EnabledInProgress)?)
    }

    /// The effective discovery configuration of a repository: its own, or the
    /// default, and never enabled while the feature is inactive.
    pub fn get_remote_discovery_config(&self, repository: &Repository) -> DiscoveryConfig {
        let config = repository
            .discovery_config()
            .unwrap_or_else(|| self.inner.config.default_discovery_config());
        let enabled = self.inner.config.feature_active
            && repository.kind() == RepositoryKind::Proxy
            && config.is_enabled();
        config.with_enabled(enabled)
    }

    /// Stores the discovery configuration of a proxy and, if it was switched on
    /// or off, updates its prefix file.
    pub fn set_remote_discovery_config(
        &self,
        repository: &Arc<Repository>,
        config: DiscoveryConfig,
    ) -> Result<()> {
        if repository.kind() != RepositoryKind::Proxy {
            return Err(RoutingError::NotAProxy(repository.id().to_string()));
        }
        let previous = repository
            .discovery_config()
            .unwrap_or_else(|| self.inner.config.default_discovery_config());
        let enabled_changed = previous.is_enabled() != config.is_enabled();

        repository.set_discovery_config(config.clone());
        self.emit(RoutingEvent::DiscoveryConfigChanged {
            repository: repository.id().to_string(),
            config,
        });
        if enabled_changed {
            self.update_prefix_file(repository)?;
        }
        Ok(())
    }

    /// Whether an item event is about the prefix file of a routed repository.
    pub fn is_event_about_prefix_file(&self, event: &ItemEvent) -> bool {
        event.is_file
            && self.is_maven_repository_supported(&event.repository)
            && event.path == self.inner.config.local_prefix_file_path
    }

    /// Ready once the periodic updater completed its first pass.
    pub fn is_ready(&self) -> bool {
        !self.inner.config.feature_active || self.inner.updater_ran.load(Ordering::Relaxed)
    }

    pub fn is_update_running_for(&self, repository: &Repository) -> bool {
        self.inner.executor.has_running_with_key(repository.id())
    }

    /// True until the periodic updater finished its first pass, and while any
    /// update job runs.
    pub fn is_update_prefix_file_job_running(&self) -> bool {
        if self.inner.config.feature_active && !self.inner.updater_ran.load(Ordering::Relaxed) {
            return true;
        }
        !self.inner.executor.running_keys().is_empty()
    }

    pub async fn on_event(&self, event: RepositoryEvent) {
        if !self.inner.config.feature_active {
            return;
        }
        match event {
            RepositoryEvent::Added(repository) => {
                if self.is_maven_repository_supported(&repository) {
                    let _ = self.initialize_prefix_file(&repository).await;
                }
            }
            RepositoryEvent::Removed(repository) => {
                self.inner.executor.cancel_running_with_key(repository.id());
                // a job already committing finishes before the file goes away
                let state = self.inner.states.read().get(repository.id()).cloned();
                let guard = match &state {
                    Some(state) => Some(state.write_lock.lock().await),
                    None => None,
                };
                self.inner.states.write().remove(repository.id());
                if let Err(e) = self.prefix_file_of(&repository).delete().await {
                    tracing::debug!(repository = %repository, "Could not delete prefix file: {e}");
                }
                drop(guard);
                for group in self.inner.registry.groups_of(repository.id()) {
                    self.log_update_error(&group, self.update_prefix_file(&group));
                }
            }
            RepositoryEvent::ConfigurationChanged {
                repository,
                remote_url_changed,
                local_status_changed,
                proxy_mode_changed,
            } => {
                if !self.is_maven_repository_supported(&repository) {
                    return;
                }
                if remote_url_changed && repository.kind() == RepositoryKind::Proxy {
                    self.log_update_error(&repository, self.force_update_prefix_file(&repository));
                } else if local_status_changed || proxy_mode_changed {
                    self.log_update_error(&repository, self.update_prefix_file(&repository));
                }
            }
            RepositoryEvent::GroupMembersChanged(group) => {
                if self.is_maven_repository_supported(&group) {
                    self.log_update_error(&group, self.update_prefix_file(&group));
                }
            }
            RepositoryEvent::ItemStored(item) => self.on_item_event(item, true).await,
            RepositoryEvent::ItemDeleted(item) => self.on_item_event(item, false).await,
        }
    }

    async fn on_item_event(&self, item: ItemEvent, stored: bool) {
        let repository = &item.repository;
        if self.is_event_about_prefix_file(&item) {
            // written by someone else, pick up what is there now
            if !item.context.has(ContextFlag::RoutingOwnIo)
                && let Err(e) = self.refresh_published(repository).await
            {
                tracing::warn!(repository = %repository, "Could not reload prefix file: {e}");
            }
            return;
        }
        if item.context.has(ContextFlag::RoutingOwnIo)
            || repository.kind() != RepositoryKind::Hosted
            || !self.is_maven_repository_supported(repository)
        {
            return;
        }

        let result = if stored {
            if !item.is_file {
                return;
            }
            self.offer_entry(repository, &item.path).await
        } else {
            self.revoke_entry(repository, &item.path).await
        };
        match result {
            Ok(true) => tracing::debug!(repository = %repository, path = %item.path, "Prefix file modified"),
            Ok(false) => {}
            Err(e) => tracing::warn!(repository = %repository, path = %item.path, "Could not modify prefix file: {e}"),
        }
    }

    /// One pass of the periodic updater: repositories without a prefix file
    /// get one, proxies are rediscovered when their last discovery failed or
    /// is older than their discovery interval.
    pub async fn may_update_all(&self) {
        tracing::trace!("Checking prefix files of all repositories");
        for repository in self.inner.registry.all() {
            if !self.is_maven_repository_supported(&repository) || !repository.is_in_service() {
                continue;
            }
            if !self.prefix_file_of(&repository).exists().await {
                if self.check_update_conditions(&repository).is_ok() {
                    tracing::debug!(repository = %repository, "Updating missing prefix file");
                    self.spawn_update(&repository, true);
                }
            } else if repository.kind() == RepositoryKind::Proxy {
                self.may_update_proxy(&repository);
            }
        }
    }

    fn may_update_proxy(&self, repository: &Arc<Repository>) -> bool {
        let config = self.get_remote_discovery_config(repository);
        if !config.is_enabled() {
            return false;
        }
        let status = match self.discovery_status(repository) {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(repository = %repository, "Could not read discovery status: {e}");
                return false;
            }
        };
        let age = now_millis() - status.last_discovery_timestamp();
        let due = match status.status() {
            DStatus::Error => true,
            DStatus::EnabledNotPossible => true,
            _ => age > config.discovery_interval().as_millis() as i64,
        };
        if !due {
            return false;
        }
        if self.check_update_conditions(repository).is_err() {
            return false;
        }
        let spawned = self.spawn_update(repository, false);
        if spawned {
            tracing::debug!(repository = %repository, status = status.status().as_str(), "Updating proxy prefix file");
        } else {
            tracing::info!(repository = %repository, "Periodic update of prefix file skipped as there is an ongoing job");
        }
        spawned
    }

    fn log_update_error(&self, repository: &Repository, result: Result<bool>) {
        match result {
            Ok(_) => {}
            Err(e) if e.is_precondition() => {
                tracing::debug!(repository = %repository, "Not updating prefix file: {e}")
            }
            Err(e) => tracing::warn!(repository = %repository, "Could not update prefix file: {e}"),
        }
    }

    fn check_supported(&self, repository: &Repository) -> Result<()> {
        if !self.is_maven_repository_supported(repository) {
            return Err(RoutingError::UnsupportedRepository(
                repository.id().to_string(),
            ));
        }
        Ok(())
    }

    fn check_update_conditions(&self, repository: &Repository) -> Result<()> {
        self.check_supported(repository)?;
        if !repository.is_in_service() {
            return Err(RoutingError::OutOfService(repository.id().to_string()));
        }
        if repository.kind() == RepositoryKind::Proxy && !repository.proxy_mode().should_proxy() {
            let status = DiscoveryStatus::ran(
                DStatus::EnabledNotPossible,
                "none",
                "Proxy repository is blocked.",
                now_millis(),
            )?;
            self.state(repository).discovery.store(Some(Arc::new(status)));
            return Err(RoutingError::RemoteAccessBlocked(
                repository.id().to_string(),
            ));
        }
        Ok(())
    }

    fn spawn_update(&self, repository: &Arc<Repository>, forced: bool) -> bool {
        let manager = self.clone();
        let target = repository.clone();
        let job = move |token: CancellationToken| async move {
            manager.run_update_job(&target, &token).await;
        };
        if forced {
            let cancelled = self.inner.executor.must_execute(repository.id(), job);
            if cancelled {
                tracing::debug!(repository = %repository, "Cancelled running prefix file update");
            }
            cancelled
        } else {
            self.inner.executor.may_execute(repository.id(), job)
        }
    }

    async fn run_update_job(&self, repository: &Arc<Repository>, token: &CancellationToken) {
        match self.update_and_publish(repository, token).await {
            Ok(()) => {}
            Err(UpdateError::Cancelled) => {
                tracing::debug!(repository = %repository, "Prefix file update cancelled")
            }
            Err(UpdateError::Routing(e)) if e.is_precondition() => {
                tracing::debug!(repository = %repository, "Repository not in state for prefix file update: {e}")
            }
            Err(UpdateError::Routing(e)) => {
                tracing::warn!(repository = %repository, "Problem during prefix file update: {e}");
                if repository.kind() == RepositoryKind::Proxy && !token.is_cancelled() {
                    match DiscoveryStatus::ran(DStatus::Error, "none", e.to_string(), now_millis()) {
                        Ok(status) => self
                            .state(repository)
                            .discovery
                            .store(Some(Arc::new(status))),
                        Err(e) => tracing::error!("Could not record discovery status: {e}"),
                    }
                }
            }
        }
    }

    async fn update_and_publish(
        &self,
        repository: &Arc<Repository>,
        token: &CancellationToken,
    ) -> Result<(), UpdateError> {
        self.check_update_conditions(repository)?;
        let (entries, status) = match repository.kind() {
            RepositoryKind::Hosted => (self.compute_hosted(repository, token).await?, None),
            RepositoryKind::Proxy => self.compute_proxy(repository, None, token).await?,
            RepositoryKind::Group => (self.compute_group(repository).await?, None),
            RepositoryKind::Shadow => return Ok(()),
        };
        self.commit(repository, entries, status, token).await
    }

    async fn compute_hosted(
        &self,
        repository: &Repository,
        token: &CancellationToken,
    ) -> Result<Option<PrefixSet>, UpdateError> {
        self.discover_local(repository, token).await
    }

    async fn discover_local(
        &self,
        repository: &Repository,
        token: &CancellationToken,
    ) -> Result<Option<PrefixSet>, UpdateError> {
        match self
            .inner
            .local_discoverer
            .discover(repository.local().as_ref(), token)
            .await
        {
            Ok(entries) => Ok(Some(entries)),
            Err(LocalDiscoveryError::Strategy(StrategyError::Cancelled)) => {
                Err(UpdateError::Cancelled)
            }
            Err(e) => {
                tracing::debug!(repository = %repository, "Local discovery unsuccessful: {e}");
                Ok(None)
            }
        }
    }

    async fn compute_proxy(
        &self,
        repository: &Repository,
        strategies: Option<&[Arc<dyn RemoteStrategy>]>,
        token: &CancellationToken,
    ) -> Result<(Option<PrefixSet>, Option<DiscoveryStatus>), UpdateError> {
        if !self.get_remote_discovery_config(repository).is_enabled() {
            tracing::debug!(repository = %repository, "Remote discovery disabled");
            return Ok((None, None));
        }

        let started = Instant::now();
        let discovered = match strategies {
            Some(strategies) => {
                RemoteContentDiscoverer::discover_with(strategies, repository, token).await
            }
            None => self.inner.remote_discoverer.discover(repository, token).await,
        };
        let result = discovered.map_err(|_| UpdateError::Cancelled)?;
        shared::histogram!(DISCOVERY_DURATION).record(started.elapsed().as_secs_f64());

        let status = result.to_status(now_millis())?;
        shared::counter!(DISCOVERY_RUNS, "status" => status.status().as_str()).increment(1);
        tracing::info!(
            repository = %repository,
            status = status.status().as_str(),
            strategy = status.last_discovery_strategy().unwrap_or("none"),
            "{}",
            status.last_discovery_message().unwrap_or_default()
        );

        let entries = match result.into_entries() {
            Some(mut remote) => match self.discover_local(repository, token).await? {
                Some(local) => {
                    remote.extend(&local);
                    Some(remote)
                }
                None => None,
            },
            None => None,
        };
        Ok((entries, Some(status)))
    }

    /// The union of all in-service members' lists, or nothing if any of them
    /// has no supported prefix file.
    async fn compute_group(&self, group: &Repository) -> Result<Option<PrefixSet>, UpdateError> {
        let mut entries = PrefixSet::new();
        for member_id in group.members() {
            let Some(member) = self.inner.registry.get(&member_id) else {
                continue;
            };
            if !member.is_in_service() {
                continue;
            }
            let loaded = self.prefix_file_of(&member).load().await?;
            match PrefixSnapshot::from(loaded).entries() {
                Some(member_entries) => entries.extend(member_entries),
                None => {
                    tracing::debug!(group = %group, member = %member, "Member has no published prefix file");
                    return Ok(None);
                }
            }
        }
        Ok(Some(entries))
    }

    async fn commit(
        &self,
        repository: &Arc<Repository>,
        entries: Option<PrefixSet>,
        status: Option<DiscoveryStatus>,
        token: &CancellationToken,
    ) -> Result<(), UpdateError> {
        if token.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        let state = self.state(repository);
        let _guard = state.write_lock.lock().await;
        if token.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        if let Some(status) = status {
            state.discovery.store(Some(Arc::new(status)));
        }

        let was_supported = state.published.load().is_supported();
        match entries {
            Some(entries) => {
                self.publish_locked(repository, &entries).await?;
                if !was_supported {
                    tracing::info!("Updated and published prefix file of {repository}");
                }
            }
            None => {
                self.unpublish_locked(repository).await?;
                if was_supported {
                    tracing::info!(
                        "Unpublished prefix file of {repository} (and is marked for noscrape)"
                    );
                }
            }
        }
        Ok(())
    }

    /// Callers hold the repository's write lock.
    async fn publish_locked(&self, repository: &Arc<Repository>, entries: &PrefixSet) -> Result<()> {
        let file = self.prefix_file_of(repository);
        if let Err(e) = file.write_set(entries).await {
            // a list that cannot be written is not published at all
            if matches!(e, RoutingError::Codec(_)) {
                self.unpublish_locked(repository).await?;
            }
            return Err(e);
        }
        self.state(repository)
            .published
            .store(Arc::new(PrefixSnapshot::Supported {
                entries: entries.clone(),
                last_modified: now_millis(),
            }));
        shared::counter!(PREFIX_FILE_PUBLISHED).increment(1);
        self.emit(RoutingEvent::PrefixFilePublished {
            repository: repository.id().to_string(),
        });
        self.propagate(repository);
        Ok(())
    }

    /// Callers hold the repository's write lock.
    async fn unpublish_locked(&self, repository: &Arc<Repository>) -> Result<()> {
        self.prefix_file_of(repository).write_unsupported().await?;
        self.state(repository)
            .published
            .store(Arc::new(PrefixSnapshot::Unsupported {
                last_modified: now_millis(),
            }));
        shared::counter!(PREFIX_FILE_UNPUBLISHED).increment(1);
        self.emit(RoutingEvent::PrefixFileUnpublished {
            repository: repository.id().to_string(),
        });
        self.propagate(repository);
        Ok(())
    }

    /// Re-evaluates the groups containing `repository`.
    fn propagate(&self, repository: &Repository) {
        for group in self.inner.registry.groups_of(repository.id()) {
            if self.is_maven_repository_supported(&group) {
                self.spawn_update(&group, true);
            }
        }
    }

    async fn refresh_published(&self, repository: &Repository) -> Result<Arc<PrefixSnapshot>> {
        let loaded = self.prefix_file_of(repository).load().await?;
        let snapshot = Arc::new(PrefixSnapshot::from(loaded));
        self.state(repository).published.store(snapshot.clone());
        Ok(snapshot)
    }

    fn prefix_file_of(&self, repository: &Repository) -> FilePrefixSource {
        FilePrefixSource::new(
            repository.local().clone(),
            self.inner.config.local_prefix_file_path.clone(),
            self.inner.codec.clone(),
        )
    }

    fn state(&self, repository: &Repository) -> Arc<RepositoryState> {
        if let Some(state) = self.inner.states.read().get(repository.id()) {
            return state.clone();
        }
        self.inner
            .states
            .write()
            .entry(repository.id().to_string())
            .or_default()
            .clone()
    }

    fn emit(&self, event: RoutingEvent) {
        // no subscribers is fine
        let _ = self.inner.events.send(event);
    }
}
