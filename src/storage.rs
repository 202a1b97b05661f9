use std::path::{Path, PathBuf};

use anyhow::Result;
use sha2::{Digest, Sha256};
use tokio::fs;

/// Local file store for ingested media, served back over HTTP under
/// `base_url`. Keys are relative paths like `media/<hash>.<ext>`.
#[derive(Clone, Debug)]
pub struct MediaStorage {
    base_dir: PathBuf,
    base_url: String,
}

impl MediaStorage {
    pub fn new(base_dir: PathBuf, base_url: String) -> Self {
        Self {
            base_dir,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, data).await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve_path(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve_path(key);
        match fs::metadata(path).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }

    pub fn resolve_path(&self, key: &str) -> PathBuf {
        let normalized = key.trim_start_matches('/');
        self.base_dir.join(Path::new(normalized))
    }

    pub fn media_key(bytes: &[u8], ext: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let hash = hex::encode(hasher.finalize());
        format!("media/{hash}.{ext}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_round_trip_and_public_url() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(
            dir.path().to_path_buf(),
            "http://localhost:3000/".to_string(),
        );
        let key = MediaStorage::media_key(b"payload", "png");
        assert!(key.starts_with("media/"));
        assert!(!storage.exists(&key).await.unwrap());

        storage.put(&key, b"payload").await.unwrap();
        assert!(storage.exists(&key).await.unwrap());
        assert_eq!(storage.get(&key).await.unwrap().unwrap(), b"payload");

        let url = storage.public_url(&key);
        assert!(url.starts_with("http://localhost:3000/media/"));
        assert!(url.ends_with(".png"));
    }

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(dir.path().to_path_buf(), "http://x".to_string());
        assert!(storage.get("media/absent.png").await.unwrap().is_none());
    }
}
