use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hex::encode as hex_encode;
use sha2::{Digest, Sha256};
use tokio::fs;
use walkdir::WalkDir;

use super::{
    Bucket, ObjectInfo, ObjectStore, ObjectStoreError, StoreResult, StoreStage, UploadReceipt,
};

/// Directory-backed object store. Keys map to paths under
/// `{root}/{source|output}/`. Used by the test suite and by air-gapped
/// development runs.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn bucket_root(&self, bucket: Bucket) -> PathBuf {
        match bucket {
            Bucket::Source => self.root.join("source"),
            Bucket::Output => self.root.join("output"),
        }
    }

    fn object_path(&self, key: &str, bucket: Bucket) -> PathBuf {
        self.bucket_root(bucket).join(key)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn download(&self, key: &str, local_path: &Path, bucket: Bucket) -> StoreResult<u64> {
        let source = self.object_path(key, bucket);
        if !source.exists() {
            return Err(ObjectStoreError::new(
                StoreStage::Download,
                false,
                format!("404: {key} not found in {bucket} bucket"),
            ));
        }
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| ObjectStoreError::io(StoreStage::Download, err))?;
        }
        fs::copy(&source, local_path)
            .await
            .map_err(|err| ObjectStoreError::io(StoreStage::Download, err))
    }

    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        _content_type: &str,
        bucket: Bucket,
    ) -> StoreResult<UploadReceipt> {
        let target = self.object_path(key, bucket);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| ObjectStoreError::io(StoreStage::Upload, err))?;
        }
        let bytes = fs::read(local_path)
            .await
            .map_err(|err| ObjectStoreError::io(StoreStage::Upload, err))?;
        fs::write(&target, &bytes)
            .await
            .map_err(|err| ObjectStoreError::io(StoreStage::Upload, err))?;
        Ok(UploadReceipt {
            key: key.to_string(),
            size: bytes.len() as u64,
            etag: hex_encode(Sha256::digest(&bytes)),
            uploaded_at: Utc::now(),
        })
    }

    async fn head(&self, key: &str, bucket: Bucket) -> StoreResult<Option<ObjectInfo>> {
        let path = self.object_path(key, bucket);
        match fs::metadata(&path).await {
            Ok(metadata) => Ok(Some(ObjectInfo {
                key: key.to_string(),
                size: metadata.len(),
                content_type: None,
                uploaded_at: metadata
                    .modified()
                    .ok()
                    .map(DateTime::<Utc>::from),
            })),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ObjectStoreError::io(StoreStage::List, err)),
        }
    }

    async fn list(&self, prefix: &str, max: usize, bucket: Bucket) -> StoreResult<Vec<ObjectInfo>> {
        let root = self.bucket_root(bucket);
        if !root.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&root) else {
                continue;
            };
            let key = relative.to_string_lossy().replace('\\', "/");
            if !key.starts_with(prefix) {
                continue;
            }
            let metadata = entry
                .metadata()
                .map_err(|err| ObjectStoreError::new(StoreStage::List, false, err.to_string()))?;
            entries.push(ObjectInfo {
                key,
                size: metadata.len(),
                content_type: None,
                uploaded_at: metadata
                    .modified()
                    .ok()
                    .map(DateTime::<Utc>::from),
            });
            if entries.len() >= max {
                break;
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn delete(&self, key: &str, bucket: Bucket) -> StoreResult<()> {
        let path = self.object_path(key, bucket);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ObjectStoreError::io(StoreStage::Delete, err)),
        }
    }

    fn public_url(&self, key: &str, bucket: Bucket) -> String {
        format!("file://{}", self.object_path(key, bucket).display())
    }
}
