use super::{DirEntry, LocalStorage, StorageError, StorageItem};
use crate::context::RequestContext;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Local storage rooted at a directory on disk.
pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FilesystemStorage { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let mut resolved = self.root.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(StorageError::InvalidPath(path.to_string()));
            }
            resolved.push(segment);
        }
        Ok(resolved)
    }
}

fn modified_millis(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(-1)
}

#[async_trait]
impl LocalStorage for FilesystemStorage {
    async fn retrieve(&self, path: &str) -> Result<Option<StorageItem>, StorageError> {
        let file = self.resolve(path)?;
        let metadata = match tokio::fs::metadata(&file).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            return Ok(None);
        }
        let content = tokio::fs::read(&file).await?;
        Ok(Some(StorageItem {
            path: path.to_string(),
            content: Bytes::from(content),
            modified: modified_millis(&metadata),
        }))
    }

    async fn store(
        &self,
        _ctx: &RequestContext,
        path: &str,
        content: Bytes,
    ) -> Result<(), StorageError> {
        let file = self.resolve(path)?;
        if file == self.root {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write aside and rename so readers never see a partial file
        let mut staged = file.clone().into_os_string();
        staged.push(".tmp");
        tokio::fs::write(&staged, &content).await?;
        tokio::fs::rename(&staged, &file).await?;
        Ok(())
    }

    async fn delete(&self, _ctx: &RequestContext, path: &str) -> Result<(), StorageError> {
        let file = self.resolve(path)?;
        let result = match tokio::fs::metadata(&file).await {
            Ok(metadata) if metadata.is_dir() => tokio::fs::remove_dir_all(&file).await,
            Ok(_) => tokio::fs::remove_file(&file).await,
            Err(e) => Err(e),
        };
        match result {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            other => Ok(other?),
        }
    }

    async fn list(&self, path: &str) -> Result<Vec<DirEntry>, StorageError> {
        let dir = self.resolve(path)?;
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let is_dir = entry.file_type().await?.is_dir();
            entries.push(DirEntry { name, is_dir });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}
