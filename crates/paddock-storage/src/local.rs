use crate::traits::{DocumentStore, StorageError, StorageResult, StoredDocument};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Local filesystem document store.
#[derive(Clone)]
pub struct LocalDocumentStore {
    base_path: PathBuf,
    base_url: String,
    max_file_size: usize,
    allowed_extensions: Vec<String>,
}

impl LocalDocumentStore {
    /// Create a new LocalDocumentStore.
    ///
    /// # Arguments
    /// * `base_path` - Root directory for uploads (e.g., "uploads/invoices")
    /// * `base_url` - Base URL the files are served under
    /// * `max_file_size` - Upload size cap in bytes
    /// * `allowed_extensions` - Lowercase extension allow-list
    pub async fn new(
        base_path: impl Into<PathBuf>,
        base_url: String,
        max_file_size: usize,
        allowed_extensions: Vec<String>,
    ) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create upload directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalDocumentStore {
            base_path,
            base_url,
            max_file_size,
            allowed_extensions,
        })
    }

    /// Validate the upload against the allow-list and size cap.
    fn validate(&self, filename: &str, size: usize) -> StorageResult<String> {
        if size == 0 {
            return Err(StorageError::EmptyFile);
        }
        if size > self.max_file_size {
            return Err(StorageError::FileTooLarge {
                size,
                max: self.max_file_size,
            });
        }

        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .ok_or_else(|| StorageError::InvalidFilename(filename.to_string()))?;

        if !self.allowed_extensions.contains(&extension) {
            return Err(StorageError::InvalidExtension {
                extension,
                allowed: self.allowed_extensions.clone(),
            });
        }

        Ok(extension)
    }

    /// Convert storage key to filesystem path, rejecting traversal attempts.
    fn key_to_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.contains("..") || key.starts_with('/') {
            return Err(StorageError::InvalidKey(
                "Storage key contains invalid characters".to_string(),
            ));
        }
        Ok(self.base_path.join(key))
    }

    fn generate_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn save(&self, filename: &str, data: Vec<u8>) -> StorageResult<StoredDocument> {
        let extension = self.validate(filename, data.len())?;

        // Collision-free name; the original filename is kept on the invoice
        // record, not in the key.
        let key = format!("invoices/{}.{}", Uuid::new_v4(), extension);
        let path = self.key_to_path(&key)?;
        let size = data.len();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let start = std::time::Instant::now();

        let mut file = fs::File::create(&path).await.map_err(|e| {
            StorageError::SaveFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;

        file.write_all(&data).await.map_err(|e| {
            StorageError::SaveFailed(format!("Failed to write file {}: {}", path.display(), e))
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::SaveFailed(format!("Failed to sync file {}: {}", path.display(), e))
        })?;

        let url = self.generate_url(&key);

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Document saved"
        );

        Ok(StoredDocument { key, url })
    }

    async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.key_to_path(key)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(key.to_string()));
        }

        let data = fs::read(&path).await.map_err(|e| {
            StorageError::SaveFailed(format!("Failed to read file {}: {}", path.display(), e))
        })?;

        Ok(data)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_to_path(key)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }

        fs::remove_file(&path).await.map_err(|e| {
            StorageError::DeleteFailed(format!("Failed to delete file {}: {}", path.display(), e))
        })?;

        tracing::info!(path = %path.display(), key = %key, "Document deleted");

        Ok(())
    }

    fn resolve_path(&self, key: &str) -> StorageResult<PathBuf> {
        self.key_to_path(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MAX: usize = 10 * 1024 * 1024;

    async fn test_store(dir: &Path) -> LocalDocumentStore {
        LocalDocumentStore::new(
            dir,
            "/uploads/invoices".to_string(),
            MAX,
            vec![
                "pdf".to_string(),
                "jpg".to_string(),
                "jpeg".to_string(),
                "png".to_string(),
            ],
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_save_and_read() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path()).await;

        let data = b"%PDF-1.4 test".to_vec();
        let doc = store.save("invoice.pdf", data.clone()).await.unwrap();

        assert!(doc.key.starts_with("invoices/"));
        assert!(doc.key.ends_with(".pdf"));
        assert!(doc.url.starts_with("/uploads/invoices/"));

        let read_back = store.read(&doc.key).await.unwrap();
        assert_eq!(read_back, data);
    }

    #[tokio::test]
    async fn test_generated_keys_are_collision_free() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path()).await;

        let a = store.save("same.jpg", b"a".to_vec()).await.unwrap();
        let b = store.save("same.jpg", b"b".to_vec()).await.unwrap();
        assert_ne!(a.key, b.key);
    }

    #[tokio::test]
    async fn test_rejects_disallowed_extension() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path()).await;

        let result = store.save("malware.exe", b"MZ".to_vec()).await;
        assert!(matches!(result, Err(StorageError::InvalidExtension { .. })));

        let result = store.save("noextension", b"data".to_vec()).await;
        assert!(matches!(result, Err(StorageError::InvalidFilename(_))));
    }

    #[tokio::test]
    async fn test_extension_check_is_case_insensitive() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path()).await;
        assert!(store.save("scan.PDF", b"%PDF".to_vec()).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_oversized_and_empty_files() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path()).await;

        let oversized = vec![0u8; MAX + 1];
        let result = store.save("big.pdf", oversized).await;
        assert!(matches!(result, Err(StorageError::FileTooLarge { .. })));

        let result = store.save("empty.pdf", Vec::new()).await;
        assert!(matches!(result, Err(StorageError::EmptyFile)));
    }

    #[tokio::test]
    async fn test_delete_missing_file_is_noop() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path()).await;

        assert!(store.delete("invoices/nonexistent.pdf").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_removes_file() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path()).await;

        let doc = store.save("gone.png", b"png".to_vec()).await.unwrap();
        store.delete(&doc.key).await.unwrap();

        assert!(matches!(
            store.read(&doc.key).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path()).await;

        assert!(matches!(
            store.read("../../etc/passwd").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            store.delete("/etc/passwd").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            store.resolve_path("../escape.pdf"),
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_path_lands_under_base() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path()).await;

        let doc = store.save("doc.pdf", b"%PDF".to_vec()).await.unwrap();
        let path = store.resolve_path(&doc.key).unwrap();
        assert!(path.starts_with(dir.path()));
    }
}
