//! Status values reported for a repository: whether its prefix file is published,
//! and how the last remote discovery went.

use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum StatusError {
    #[error("discovery status {0} means discovery did not run, it cannot carry an outcome")]
    UnexpectedOutcome(DStatus),

    #[error("discovery status {0} means discovery ran, it requires strategy and message")]
    MissingOutcome(DStatus),

    #[error("discovery timestamp must be positive, got {0}")]
    InvalidTimestamp(i64),
}

/// Remote discovery state of a repository.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DStatus {
    NotAProxy,
    Disabled,
    EnabledInProgress,
    EnabledNotPossible,
    Successful,
    Unsuccessful,
    Error,
}

impl DStatus {
    pub const fn rank(self) -> u8 {
        match self {
            DStatus::NotAProxy => 0,
            DStatus::Disabled => 1,
            DStatus::EnabledInProgress => 2,
            DStatus::EnabledNotPossible => 3,
            DStatus::Successful => 4,
            DStatus::Unsuccessful => 5,
            DStatus::Error => 6,
        }
    }

    /// Discovery is switched on for the repository.
    pub const fn is_enabled(self) -> bool {
        self.rank() >= DStatus::EnabledInProgress.rank()
    }

    /// Discovery ran at least once and produced an outcome.
    pub const fn has_run(self) -> bool {
        self.rank() >= DStatus::EnabledNotPossible.rank()
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            DStatus::NotAProxy => "not_a_proxy",
            DStatus::Disabled => "disabled",
            DStatus::EnabledInProgress => "enabled_in_progress",
            DStatus::EnabledNotPossible => "enabled_not_possible",
            DStatus::Successful => "successful",
            DStatus::Unsuccessful => "unsuccessful",
            DStatus::Error => "error",
        }
    }
}

impl PartialOrd for DStatus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DStatus {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for DStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiscoveryStatus {
    NotYetRun {
        status: DStatus,
    },
    Ran {
        status: DStatus,
        strategy: String,
        message: String,
        timestamp: i64,
    },
}

impl DiscoveryStatus {
    pub fn not_yet_run(status: DStatus) -> Result<Self, StatusError> {
        Self::from_parts(status, None, None, -1)
    }

    pub fn ran(
        status: DStatus,
        strategy: impl Into<String>,
        message: impl Into<String>,
        timestamp: i64,
    ) -> Result<Self, StatusError> {
        Self::from_parts(
            status,
            Some(strategy.into()),
            Some(message.into()),
            timestamp,
        )
    }

    /// Builds a status from loose parts, as read back from a persisted form.
    /// The outcome fields must be present exactly when `status.has_run()`.
    pub fn from_parts(
        status: DStatus,
        strategy: Option<String>,
        message: Option<String>,
        timestamp: i64,
    ) -> Result<Self, StatusError> {
        if !status.has_run() {
            if strategy.is_some() || message.is_some() || timestamp > 0 {
                return Err(StatusError::UnexpectedOutcome(status));
            }
            return Ok(DiscoveryStatus::NotYetRun { status });
        }
        let (Some(strategy), Some(message)) = (strategy, message) else {
            return Err(StatusError::MissingOutcome(status));
        };
        if timestamp <= 0 {
            return Err(StatusError::InvalidTimestamp(timestamp));
        }
        Ok(DiscoveryStatus::Ran {
            status,
            strategy,
            message,
            timestamp,
        })
    }

    pub fn status(&self) -> DStatus {
        match self {
            DiscoveryStatus::NotYetRun { status } | DiscoveryStatus::Ran { status, .. } => *status,
        }
    }

    pub fn last_discovery_strategy(&self) -> Option<&str> {
        match self {
            DiscoveryStatus::NotYetRun { .. } => None,
            DiscoveryStatus::Ran { strategy, .. } => Some(strategy),
        }
    }

    pub fn last_discovery_message(&self) -> Option<&str> {
        match self {
            DiscoveryStatus::NotYetRun { .. } => None,
            DiscoveryStatus::Ran { message, .. } => Some(message),
        }
    }

    /// Millis since the epoch, -1 when discovery never ran.
    pub fn last_discovery_timestamp(&self) -> i64 {
        match self {
            DiscoveryStatus::NotYetRun { .. } => -1,
            DiscoveryStatus::Ran { timestamp, .. } => *timestamp,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PStatus {
    Published,
    NotPublished,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishingStatus {
    status: PStatus,
    message: String,
    last_published: i64,
    file_path: Option<String>,
}

impl PublishingStatus {
    pub fn new(
        status: PStatus,
        message: impl Into<String>,
        last_published: i64,
        file_path: Option<String>,
    ) -> Self {
        PublishingStatus {
            status,
            message: message.into(),
            last_published,
            file_path,
        }
    }

    pub fn status(&self) -> PStatus {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn last_published_timestamp(&self) -> i64 {
        match self.status {
            PStatus::Published => self.last_published,
            PStatus::NotPublished => -1,
        }
    }

    pub fn last_published_file_path(&self) -> Option<&str> {
        match self.status {
            PStatus::Published => self.file_path.as_deref(),
            PStatus::NotPublished => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingStatus {
    publishing: PublishingStatus,
    discovery: DiscoveryStatus,
}

impl RoutingStatus {
    pub fn new(publishing: PublishingStatus, discovery: DiscoveryStatus) -> Self {
        RoutingStatus {
            publishing,
            discovery,
        }
    }

    pub fn publishing_status(&self) -> &PublishingStatus {
        &self.publishing
    }

    pub fn discovery_status(&self) -> &DiscoveryStatus {
        &self.discovery
    }
}
