use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::LedgerStorage;
use crate::error::StorageError;

/// One JSON document per key inside a directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Use `dir` for ledger files, creating it if it doesn't exist
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

#[async_trait]
impl LedgerStorage for FileStorage {
    async fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");

        // Rename over the old file so readers never see a half-written ledger
        fs::write(&tmp, value).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_from_a_fresh_handle() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        storage.save("feeRecords", "[]").await.unwrap();

        let reopened = FileStorage::open(dir.path()).await.unwrap();
        assert_eq!(reopened.load("feeRecords").await.unwrap().as_deref(), Some("[]"));
        assert!(!reopened.path_for("feeRecords").with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn keys_are_sanitized_into_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        let path = storage.path_for("../fees/2026");
        assert_eq!(path.parent(), Some(dir.path()));
    }
}
