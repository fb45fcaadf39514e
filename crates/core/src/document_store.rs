use crate::error::StoreError;
use crate::models::RawInfo;
use crate::traits::DocumentStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

const RAW_DIR: &str = "raw";
const CLEANED_DIR: &str = "cleaned";
const RAW_EXT: &str = "bin";
const CLEANED_EXT: &str = "txt";

/// Keeps raw uploads and their page-tagged text side by side on disk:
/// `<root>/raw/<id>.bin` and `<root>/cleaned/<id>.txt`.
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn raw_path(&self, doc_id: &str) -> Result<PathBuf, StoreError> {
        validate_id(doc_id)?;
        Ok(self.root.join(RAW_DIR).join(format!("{doc_id}.{RAW_EXT}")))
    }

    fn cleaned_path(&self, doc_id: &str) -> Result<PathBuf, StoreError> {
        validate_id(doc_id)?;
        Ok(self
            .root
            .join(CLEANED_DIR)
            .join(format!("{doc_id}.{CLEANED_EXT}")))
    }
}

fn validate_id(doc_id: &str) -> Result<(), StoreError> {
    let valid = !doc_id.is_empty()
        && doc_id.len() <= 128
        && doc_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(doc_id.to_string()))
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, bytes).await?;
    Ok(())
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

async fn remove_optional(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error.into()),
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn put_raw(&self, doc_id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.raw_path(doc_id)?;
        write_file(&path, bytes).await
    }

    async fn put_cleaned(&self, doc_id: &str, text: &str) -> Result<(), StoreError> {
        let path = self.cleaned_path(doc_id)?;
        write_file(&path, text.as_bytes()).await
    }

    async fn raw(&self, doc_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        read_optional(&self.raw_path(doc_id)?).await
    }

    async fn raw_info(&self, doc_id: &str) -> Result<Option<RawInfo>, StoreError> {
        let path = self.raw_path(doc_id)?;
        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        let stored_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(Some(RawInfo {
            size: metadata.len(),
            stored_at,
        }))
    }

    async fn cleaned(&self, doc_id: &str) -> Result<Option<String>, StoreError> {
        let bytes = read_optional(&self.cleaned_path(doc_id)?).await?;
        Ok(bytes.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match fs::read_dir(self.root.join(RAW_DIR)).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_raw = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == RAW_EXT);
            if !is_raw {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                ids.push(stem.to_string());
            }
        }

        ids.sort_unstable();
        Ok(ids)
    }

    async fn delete(&self, doc_id: &str) -> Result<usize, StoreError> {
        let mut removed = 0;
        for path in [self.raw_path(doc_id)?, self.cleaned_path(doc_id)?] {
            if remove_optional(&path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
