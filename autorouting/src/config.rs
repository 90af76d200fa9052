use routing::config::{Config as RoutingConfig, DiscoveryConfig, ValidationError};
use routing::storage::{
    FilesystemStorage, HttpRemoteStorage, Layout, LocalStatus, ProxyMode, RemoteClientConfig,
    Repository, RepositoryKind, RepositoryRegistry,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: Option<String>,
    /// Used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct RepositoryConfig {
    pub id: String,
    pub name: Option<String>,
    pub kind: RepositoryKind,
    #[serde(default)]
    pub layout: Layout,
    /// Root of the repository's local storage.
    pub storage_dir: PathBuf,
    pub remote_url: Option<String>,
    #[serde(default)]
    pub remote_client: RemoteClientConfig,
    pub discovery: Option<DiscoveryConfig>,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub local_status: LocalStatus,
    #[serde(default)]
    pub proxy_mode: ProxyMode,
}

impl RepositoryConfig {
    pub fn build(&self) -> Result<Repository, ConfigError> {
        let local = Arc::new(FilesystemStorage::new(&self.storage_dir));
        let mut repository = Repository::new(self.id.as_str(), self.kind, local)
            .with_layout(self.layout)
            .with_members(self.members.iter().cloned());
        if let Some(name) = &self.name {
            repository = repository.with_name(name);
        }
        if let Some(url) = &self.remote_url {
            let remote = HttpRemoteStorage::new(url, &self.remote_client)
                .map_err(|e| ConfigError::Repository(self.id.clone(), e.to_string()))?;
            repository = repository.with_remote(Arc::new(remote));
        }
        if let Some(discovery) = &self.discovery {
            repository = repository.with_discovery_config(discovery.clone());
        }
        repository.set_local_status(self.local_status);
        repository.set_proxy_mode(self.proxy_mode);
        Ok(repository)
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub logging: Option<LoggingConfig>,
    pub metrics: Option<MetricsConfig>,
    pub admin_listener: Listener,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.routing.validate()?;

        let mut ids = HashSet::new();
        for repository in &self.repositories {
            if !ids.insert(repository.id.as_str()) {
                return Err(ConfigError::Repository(
                    repository.id.clone(),
                    "duplicate repository id".into(),
                ));
            }
        }
        for repository in &self.repositories {
            if repository.kind == RepositoryKind::Proxy && repository.remote_url.is_none() {
                return Err(ConfigError::Repository(
                    repository.id.clone(),
                    "proxy repositories need a remote_url".into(),
                ));
            }
            if let Some(member) = repository
                .members
                .iter()
                .find(|member| !ids.contains(member.as_str()))
            {
                return Err(ConfigError::Repository(
                    repository.id.clone(),
                    format!("unknown group member {member}"),
                ));
            }
        }
        Ok(())
    }

    pub fn build_registry(&self) -> Result<RepositoryRegistry, ConfigError> {
        let registry = RepositoryRegistry::new();
        for repository in &self.repositories {
            registry.register(Arc::new(repository.build()?));
        }
        Ok(registry)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid routing config: {0}")]
    InvalidRouting(#[from] ValidationError),
    #[error("invalid repository {0}: {1}")]
    Repository(String, String),
}
