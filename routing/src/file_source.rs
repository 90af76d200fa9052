use crate::codec::{PrefixCodec, PrefixFile};
use crate::context::RequestContext;
use crate::errors::RoutingError;
use crate::prefix::{PrefixSet, PrefixSource, WritablePrefixSource};
use crate::storage::LocalStorage;
use async_trait::async_trait;
use std::sync::Arc;

/// The prefix file a repository publishes in its own local storage.
pub struct FilePrefixSource {
    storage: Arc<dyn LocalStorage>,
    path: String,
    codec: PrefixCodec,
}

/// What was found at the prefix file path.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadedPrefixFile {
    pub content: PrefixFile,
    pub last_modified: i64,
}

impl FilePrefixSource {
    pub fn new(storage: Arc<dyn LocalStorage>, path: impl Into<String>, codec: PrefixCodec) -> Self {
        FilePrefixSource {
            storage,
            path: path.into(),
            codec,
        }
    }

    pub fn file_path(&self) -> &str {
        &self.path
    }

    /// Reads and parses the file. Content violating the format or its bounds
    /// loads as unsupported.
    pub async fn load(&self) -> Result<Option<LoadedPrefixFile>, RoutingError> {
        let Some(item) = self.storage.retrieve(&self.path).await? else {
            return Ok(None);
        };
        let content = match self.codec.read(&item.content) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!(path = %self.path, "Invalid prefix file, treating as unsupported: {e}");
                PrefixFile::Unsupported
            }
        };
        Ok(Some(LoadedPrefixFile {
            content,
            last_modified: item.modified,
        }))
    }

    pub async fn write_set(&self, entries: &PrefixSet) -> Result<(), RoutingError> {
        let content = self.codec.write(entries)?;
        self.storage
            .store(&RequestContext::own_io(), &self.path, content)
            .await?;
        Ok(())
    }

    /// Replaces the file with the noscrape marker.
    pub async fn write_unsupported(&self) -> Result<(), RoutingError> {
        self.storage
            .store(
                &RequestContext::own_io(),
                &self.path,
                self.codec.write_unsupported(),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PrefixSource for FilePrefixSource {
    async fn exists(&self) -> bool {
        matches!(self.storage.retrieve(&self.path).await, Ok(Some(_)))
    }

    async fn supported(&self) -> bool {
        matches!(
            self.load().await,
            Ok(Some(LoadedPrefixFile {
                content: PrefixFile::Supported(_),
                ..
            }))
        )
    }

    async fn read_entries(&self) -> Result<Option<Vec<String>>, RoutingError> {
        Ok(match self.load().await? {
            Some(LoadedPrefixFile {
                content: PrefixFile::Supported(entries),
                ..
            }) => Some(entries.to_vec()),
            _ => None,
        })
    }

    async fn last_modified_timestamp(&self) -> i64 {
        match self.storage.retrieve(&self.path).await {
            Ok(Some(item)) => item.modified,
            _ => -1,
        }
    }
}

#[async_trait]
impl WritablePrefixSource for FilePrefixSource {
    async fn write_entries(&self, source: &dyn PrefixSource) -> Result<(), RoutingError> {
        match source.read_entries().await? {
            Some(entries) => self.write_set(&PrefixSet::from_entries(entries)).await,
            None => self.write_unsupported().await,
        }
    }

    async fn delete(&self) -> Result<(), RoutingError> {
        self.storage
            .delete(&RequestContext::own_io(), &self.path)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MAGIC;
    use crate::config::Config;
    use crate::context::ContextFlag;
    use crate::prefix::ListPrefixSource;
    use crate::testutils::MemoryStorage;
    use bytes::Bytes;

    const PATH: &str = "/.meta/prefixes.txt";

    fn source(storage: &Arc<MemoryStorage>, config: &Config) -> FilePrefixSource {
        FilePrefixSource::new(storage.clone(), PATH, PrefixCodec::new(config))
    }

    #[tokio::test]
    async fn test_missing_file() {
        let storage = Arc::new(MemoryStorage::new());
        let source = source(&storage, &Config::default());
        assert!(!source.exists().await);
        assert!(!source.supported().await);
        assert_eq!(source.read_entries().await.unwrap(), None);
        assert_eq!(source.last_modified_timestamp().await, -1);
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let storage = Arc::new(MemoryStorage::new());
        let source = source(&storage, &Config::default());
        let list = ListPrefixSource::new(PrefixSet::from_entries(["/org/apache", "/com"]));

        source.write_entries(&list).await.unwrap();
        assert!(source.exists().await);
        assert!(source.supported().await);
        assert_eq!(
            source.read_entries().await.unwrap(),
            Some(vec!["/com".to_string(), "/org/apache".to_string()])
        );
        assert!(source.last_modified_timestamp().await > 0);
        // writes are tagged as the engine's own
        assert!(storage.last_context(PATH).unwrap().has(ContextFlag::RoutingOwnIo));

        source.write_unsupported().await.unwrap();
        assert!(source.exists().await);
        assert!(!source.supported().await);
        assert_eq!(source.read_entries().await.unwrap(), None);

        source.delete().await.unwrap();
        assert!(!source.exists().await);
    }

    #[tokio::test]
    async fn test_oversized_file_is_unsupported() {
        let storage = Arc::new(MemoryStorage::new());
        let config = Config {
            prefix_file_max_entries_count: 2,
            ..Config::default()
        };
        let content = format!("{MAGIC}\n/a\n/b\n/c\n");
        storage.put(PATH, Bytes::from(content));

        let source = source(&storage, &config);
        assert!(source.exists().await);
        assert!(!source.supported().await);
        assert_eq!(source.read_entries().await.unwrap(), None);
    }
}
