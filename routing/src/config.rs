use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const HOUR: Duration = Duration::from_secs(60 * 60);

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),

    #[error("prefix file path must be absolute: {0}")]
    RelativePrefixFilePath(String),

    #[error("discovery interval must be greater than zero")]
    ZeroDiscoveryInterval,

    #[error("discovery interval of {0} hours is too long")]
    DiscoveryIntervalTooLong(u64),
}

fn hours(value: u64) -> Result<Duration, ValidationError> {
    u32::try_from(value)
        .ok()
        .and_then(|hours| HOUR.checked_mul(hours))
        .ok_or(ValidationError::DiscoveryIntervalTooLong(value))
}

/// Process-wide routing bounds. Loaded once at startup and read-only afterwards.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Disables the periodic updater and event handling entirely when false.
    pub feature_active: bool,
    /// Where a repository publishes its own prefix file.
    pub local_prefix_file_path: String,
    /// Where remote repositories are expected to publish theirs.
    pub remote_prefix_file_path: String,
    pub remote_scrape_depth: usize,
    pub local_scrape_depth: usize,
    pub prefix_file_max_entries_count: usize,
    pub prefix_file_max_line_length: usize,
    /// In bytes, applied to the inflated content.
    pub prefix_file_max_size: usize,
    pub update_check_interval_secs: u64,
    pub max_concurrent_jobs: usize,
    /// Listing attempts per directory before a scraped subtree is given up.
    pub scrape_directory_attempts: usize,
    pub default_discovery_interval_hours: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            feature_active: true,
            local_prefix_file_path: "/.meta/prefixes.txt".into(),
            remote_prefix_file_path: "/.meta/prefixes.txt".into(),
            remote_scrape_depth: 2,
            local_scrape_depth: 2,
            prefix_file_max_entries_count: 100_000,
            prefix_file_max_line_length: 250,
            prefix_file_max_size: 5 * 1024 * 1024,
            update_check_interval_secs: 60 * 60,
            max_concurrent_jobs: 5,
            scrape_directory_attempts: 2,
            default_discovery_interval_hours: 24,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for path in [&self.local_prefix_file_path, &self.remote_prefix_file_path] {
            if !path.starts_with('/') {
                return Err(ValidationError::RelativePrefixFilePath(path.clone()));
            }
        }

        let positive = [
            ("prefix_file_max_entries_count", self.prefix_file_max_entries_count),
            ("prefix_file_max_line_length", self.prefix_file_max_line_length),
            ("prefix_file_max_size", self.prefix_file_max_size),
            ("max_concurrent_jobs", self.max_concurrent_jobs),
            ("scrape_directory_attempts", self.scrape_directory_attempts),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ValidationError::NotPositive(name));
            }
        }
        if self.update_check_interval_secs == 0 {
            return Err(ValidationError::NotPositive("update_check_interval_secs"));
        }
        if self.default_discovery_interval_hours == 0 {
            return Err(ValidationError::NotPositive(
                "default_discovery_interval_hours",
            ));
        }
        hours(self.default_discovery_interval_hours)?;
        Ok(())
    }

    pub fn update_check_interval(&self) -> Duration {
        Duration::from_secs(self.update_check_interval_secs)
    }

    pub fn default_discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            enabled: true,
            // validated configs never saturate
            interval: hours(self.default_discovery_interval_hours).unwrap_or(Duration::MAX),
        }
    }
}

#[derive(Deserialize)]
struct RawDiscoveryConfig {
    enabled: bool,
    interval_hours: u64,
}

/// Remote discovery settings of a single proxy repository.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(try_from = "RawDiscoveryConfig")]
pub struct DiscoveryConfig {
    enabled: bool,
    interval: Duration,
}

impl DiscoveryConfig {
    pub fn new(enabled: bool, interval: Duration) -> Result<Self, ValidationError> {
        if interval.is_zero() {
            return Err(ValidationError::ZeroDiscoveryInterval);
        }
        Ok(DiscoveryConfig { enabled, interval })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn discovery_interval(&self) -> Duration {
        self.interval
    }

    pub fn with_enabled(&self, enabled: bool) -> Self {
        DiscoveryConfig {
            enabled,
            interval: self.interval,
        }
    }
}

impl TryFrom<RawDiscoveryConfig> for DiscoveryConfig {
    type Error = ValidationError;

    fn try_from(raw: RawDiscoveryConfig) -> Result<Self, Self::Error> {
        DiscoveryConfig::new(raw.enabled, hours(raw.interval_hours)?)
    }
}
