//! Content discovery: remote strategies for proxies and the local storage walk.

mod local;
mod remote_fetch;
mod scrape;

pub use local::{LocalContentDiscoverer, LocalDiscoveryError};
pub use remote_fetch::RemotePrefixFileStrategy;
pub use scrape::RemoteScrapeStrategy;

use crate::prefix::{PrefixSet, path_depth};
use crate::status::{DStatus, DiscoveryStatus, StatusError};
use crate::storage::{DirEntry, RemoteError, Repository};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    /// The strategy could not produce a list; the next one is tried.
    #[error("{0}")]
    Failed(String),

    #[error("discovery was cancelled")]
    Cancelled,
}

impl StrategyError {
    /// Remote errors of any kind only fail the strategy at hand.
    pub(crate) fn from_remote(action: &str, error: RemoteError) -> Self {
        StrategyError::Failed(format!("{action}: {error}"))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StrategyResult {
    pub message: String,
    pub entries: PrefixSet,
}

/// A way of learning what the remote of a proxy repository contains.
#[async_trait]
pub trait RemoteStrategy: Send + Sync {
    fn id(&self) -> &'static str;

    /// Implementations check `cancel` before every remote round trip.
    async fn discover(
        &self,
        repository: &Repository,
        cancel: &CancellationToken,
    ) -> Result<StrategyResult, StrategyError>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    pub strategy: &'static str,
    pub successful: bool,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct DiscoveryResult {
    outcomes: Vec<Outcome>,
    entries: Option<PrefixSet>,
}

impl DiscoveryResult {
    pub fn is_successful(&self) -> bool {
        self.entries.is_some()
    }

    pub fn entries(&self) -> Option<&PrefixSet> {
        self.entries.as_ref()
    }

    pub fn into_entries(self) -> Option<PrefixSet> {
        self.entries
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    /// The outcome the discovery status is derived from. Strategies stop at the
    /// first success, so this is always the last one tried.
    pub fn deciding_outcome(&self) -> Option<&Outcome> {
        self.outcomes.last()
    }

    pub fn to_status(&self, timestamp: i64) -> Result<DiscoveryStatus, StatusError> {
        let Some(outcome) = self.deciding_outcome() else {
            return DiscoveryStatus::ran(
                DStatus::Unsuccessful,
                "none",
                "No discovery strategy applicable.",
                timestamp,
            );
        };
        let status = if outcome.successful {
            DStatus::Successful
        } else {
            DStatus::Unsuccessful
        };
        DiscoveryStatus::ran(status, outcome.strategy, outcome.message.clone(), timestamp)
    }
}

/// Runs remote strategies in order until one produces a list.
#[derive(Clone)]
pub struct RemoteContentDiscoverer {
    strategies: Vec<Arc<dyn RemoteStrategy>>,
}

impl RemoteContentDiscoverer {
    pub fn new(strategies: Vec<Arc<dyn RemoteStrategy>>) -> Self {
        RemoteContentDiscoverer { strategies }
    }

    pub async fn discover(
        &self,
        repository: &Repository,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryResult, StrategyError> {
        Self::discover_with(&self.strategies, repository, cancel).await
    }

    /// Only `Cancelled` is returned as an error; strategy failures are outcomes.
    pub async fn discover_with(
        strategies: &[Arc<dyn RemoteStrategy>],
        repository: &Repository,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryResult, StrategyError> {
        let mut outcomes = Vec::with_capacity(strategies.len());
        for strategy in strategies {
            if cancel.is_cancelled() {
                return Err(StrategyError::Cancelled);
            }
            let (successful, message, entries) = match strategy.discover(repository, cancel).await
            {
                Ok(result) => (true, result.message, Some(result.entries)),
                Err(StrategyError::Cancelled) => return Err(StrategyError::Cancelled),
                Err(StrategyError::Failed(message)) => (false, message, None),
            };
            tracing::debug!(
                repository = %repository.id(),
                strategy = strategy.id(),
                successful,
                "{message}"
            );
            outcomes.push(Outcome {
                strategy: strategy.id(),
                successful,
                message,
            });
            if entries.is_some() {
                return Ok(DiscoveryResult { outcomes, entries });
            }
        }
        Ok(DiscoveryResult {
            outcomes,
            entries: None,
        })
    }
}

pub(crate) fn child_path(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Entries a single listed directory contributes, and the subdirectories still to visit.
///
/// Files directly under the root become entries themselves, files deeper down make
/// their directory an entry. Subdirectories at `max_depth` become entries without
/// being listed.
pub(crate) fn classify(
    dir: &str,
    children: &[DirEntry],
    max_depth: usize,
    entries: &mut PrefixSet,
) -> Vec<String> {
    let visible: Vec<&DirEntry> = children.iter().filter(|c| !c.is_hidden()).collect();
    if dir != "/" && visible.iter().any(|c| !c.is_dir) {
        entries.insert(dir);
        return Vec::new();
    }
    let mut descend = Vec::new();
    for child in visible {
        let path = child_path(dir, &child.name);
        if !child.is_dir || path_depth(&path) >= max_depth {
            entries.insert(&path);
        } else {
            descend.push(path);
        }
    }
    descend
}
