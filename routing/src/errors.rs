use crate::codec::CodecError;
use crate::status::StatusError;
use crate::storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RoutingError {
    #[error(
        "repository {0} is not supported by automatic routing (only Maven2 hosted, proxy and group repositories are)"
    )]
    UnsupportedRepository(String),

    #[error("repository {0} is out of service")]
    OutOfService(String),

    #[error("proxy repository {0} is blocked, remote access not allowed")]
    RemoteAccessBlocked(String),

    #[error("repository {0} is not a proxy repository")]
    NotAProxy(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("prefix file rejected: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Status(#[from] StatusError),
}

impl RoutingError {
    /// Precondition errors are raised before any job is spawned and are never retried.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            RoutingError::UnsupportedRepository(_)
                | RoutingError::OutOfService(_)
                | RoutingError::RemoteAccessBlocked(_)
                | RoutingError::NotAProxy(_)
        )
    }
}

pub type Result<T, E = RoutingError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preconditions() {
        assert!(RoutingError::UnsupportedRepository("maven1".into()).is_precondition());
        assert!(RoutingError::OutOfService("central".into()).is_precondition());
        assert!(RoutingError::RemoteAccessBlocked("central".into()).is_precondition());
        assert!(RoutingError::NotAProxy("releases".into()).is_precondition());
        assert!(!RoutingError::Status(StatusError::UnexpectedOutcome(
            crate::status::DStatus::Successful
        ))
        .is_precondition());
    }
}
