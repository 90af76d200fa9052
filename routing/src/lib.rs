//! Automatic routing: discovers which paths the remote of a proxy repository
//! has content under, publishes prefix files for hosted and group repositories,
//! and filters proxy requests that cannot succeed remotely.

pub mod codec;
pub mod config;
pub mod context;
pub mod discovery;
pub mod errors;
pub mod events;
pub mod file_source;
pub mod filter;
pub mod manager;
pub mod metrics_defs;
pub mod modifier;
pub mod prefix;
pub mod scheduler;
pub mod snapshot;
pub mod status;
pub mod storage;

#[cfg(test)]
mod testutils;

pub use errors::{Result, RoutingError};
pub use filter::ProxyRequestFilter;
pub use manager::Manager;

use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
