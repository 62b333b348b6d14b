//! Filesystem backend: one directory per vault, one file per secret.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

use super::{validate_name, BackendError, ListPage, SecretBackend};

#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn file_path(&self, folder: &str, name: &str) -> Result<PathBuf, BackendError> {
        validate_name(folder)?;
        validate_name(name)?;
        Ok(self.root.join(folder).join(name))
    }

    async fn sorted_names(&self, folder: &str) -> Result<Vec<String>, BackendError> {
        validate_name(folder)?;
        let mut entries = match tokio::fs::read_dir(self.root.join(folder)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait::async_trait]
impl SecretBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, folder: &str, name: &str) -> Result<Bytes, BackendError> {
        let path = self.file_path(folder, name)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BackendError::NotFound {
                folder: folder.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, folder: &str, name: &str, content: Bytes) -> Result<(), BackendError> {
        let path = self.file_path(folder, name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &content).await?;
        debug!(folder = %folder, name = %name, bytes = content.len(), "Stored file");
        Ok(())
    }

    async fn list_page(
        &self,
        folder: &str,
        page_size: usize,
        cursor: Option<String>,
    ) -> Result<ListPage, BackendError> {
        let names = self.sorted_names(folder).await?;
        let start = match cursor {
            Some(c) => names.partition_point(|n| n.as_str() <= c.as_str()),
            None => 0,
        };
        let end = (start + page_size.max(1)).min(names.len());

        let page: Vec<String> = names[start..end].to_vec();
        let next_cursor = if end < names.len() {
            page.last().cloned()
        } else {
            None
        };

        Ok(ListPage {
            names: page,
            next_cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());

        backend.put("vault", "7", Bytes::from("pk-7")).await.unwrap();
        assert_eq!(backend.get("vault", "7").await.unwrap(), Bytes::from("pk-7"));
        assert!(dir.path().join("vault").join("7").exists());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        assert!(matches!(
            backend.get("vault", "missing").await,
            Err(BackendError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        assert!(matches!(
            backend.get("..", "etc").await,
            Err(BackendError::InvalidName(_))
        ));
        assert!(matches!(
            backend.put("vault", "../x", Bytes::new()).await,
            Err(BackendError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn test_list_pages_by_cursor() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        for i in 0..5 {
            backend.put("v", &format!("k{i}"), Bytes::new()).await.unwrap();
        }

        let first = backend.list_page("v", 3, None).await.unwrap();
        assert_eq!(first.names, vec!["k0", "k1", "k2"]);
        let second = backend.list_page("v", 3, first.next_cursor).await.unwrap();
        assert_eq!(second.names, vec!["k3", "k4"]);
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_list_missing_vault_is_empty() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        assert_eq!(backend.list_page("none", 10, None).await.unwrap(), ListPage::default());
    }
}
