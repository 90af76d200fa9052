use crate::codec::PrefixFile;
use crate::errors::RoutingError;
use crate::file_source::LoadedPrefixFile;
use crate::prefix::{PrefixSet, PrefixSource};
use async_trait::async_trait;

/// In-memory view of a repository's published prefix file. Readers get it
/// without touching storage; it is replaced whole whenever the file changes.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum PrefixSnapshot {
    #[default]
    Missing,
    Unsupported {
        last_modified: i64,
    },
    Supported {
        entries: PrefixSet,
        last_modified: i64,
    },
}

impl PrefixSnapshot {
    pub fn entries(&self) -> Option<&PrefixSet> {
        match self {
            PrefixSnapshot::Supported { entries, .. } => Some(entries),
            _ => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, PrefixSnapshot::Supported { .. })
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, PrefixSnapshot::Missing)
    }

    pub fn last_modified(&self) -> i64 {
        match self {
            PrefixSnapshot::Missing => -1,
            PrefixSnapshot::Unsupported { last_modified }
            | PrefixSnapshot::Supported { last_modified, .. } => *last_modified,
        }
    }
}

impl From<Option<LoadedPrefixFile>> for PrefixSnapshot {
    fn from(loaded: Option<LoadedPrefixFile>) -> Self {
        match loaded {
            None => PrefixSnapshot::Missing,
            Some(LoadedPrefixFile {
                content: PrefixFile::Unsupported,
                last_modified,
            }) => PrefixSnapshot::Unsupported { last_modified },
            Some(LoadedPrefixFile {
                content: PrefixFile::Supported(entries),
                last_modified,
            }) => PrefixSnapshot::Supported {
                entries,
                last_modified,
            },
        }
    }
}

#[async_trait]
impl PrefixSource for PrefixSnapshot {
    async fn exists(&self) -> bool {
        !self.is_missing()
    }

    async fn supported(&self) -> bool {
        self.is_supported()
    }

    async fn read_entries(&self) -> Result<Option<Vec<String>>, RoutingError> {
        Ok(self.entries().map(PrefixSet::to_vec))
    }

    async fn last_modified_timestamp(&self) -> i64 {
        self.last_modified()
    }
}
