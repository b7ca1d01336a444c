mod b2;
mod fs;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub use b2::B2ObjectStore;
pub use fs::FsObjectStore;

/// The two namespaces the pipeline works against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Source,
    Output,
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bucket::Source => f.write_str("source"),
            Bucket::Output => f.write_str("output"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStage {
    Auth,
    Download,
    Upload,
    List,
    Delete,
}

impl StoreStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreStage::Auth => "auth",
            StoreStage::Download => "download",
            StoreStage::Upload => "upload",
            StoreStage::List => "list",
            StoreStage::Delete => "delete",
        }
    }
}

impl fmt::Display for StoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("object store {stage} failed: {message}")]
pub struct ObjectStoreError {
    pub stage: StoreStage,
    pub retriable: bool,
    pub message: String,
}

impl ObjectStoreError {
    pub fn new(stage: StoreStage, retriable: bool, message: impl Into<String>) -> Self {
        Self {
            stage,
            retriable,
            message: message.into(),
        }
    }

    /// Network failures and 5xx responses are retriable; 401 means the
    /// cached authorization expired and is retriable after re-auth; other
    /// 4xx are terminal.
    pub fn from_response(stage: StoreStage, status: reqwest::StatusCode, body: &str) -> Self {
        let retriable =
            status.is_server_error() || status == reqwest::StatusCode::UNAUTHORIZED;
        Self::new(stage, retriable, format!("{status}: {body}"))
    }

    pub fn from_transport(stage: StoreStage, err: reqwest::Error) -> Self {
        Self::new(stage, true, err.to_string())
    }

    pub fn io(stage: StoreStage, err: std::io::Error) -> Self {
        Self::new(stage, true, err.to_string())
    }
}

pub type StoreResult<T> = Result<T, ObjectStoreError>;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UploadReceipt {
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Seam over the remote object store so the pipeline is drivable against a
/// local directory tree in tests.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn download(&self, key: &str, local_path: &Path, bucket: Bucket) -> StoreResult<u64>;

    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        content_type: &str,
        bucket: Bucket,
    ) -> StoreResult<UploadReceipt>;

    async fn head(&self, key: &str, bucket: Bucket) -> StoreResult<Option<ObjectInfo>>;

    async fn list(&self, prefix: &str, max: usize, bucket: Bucket) -> StoreResult<Vec<ObjectInfo>>;

    async fn delete(&self, key: &str, bucket: Bucket) -> StoreResult<()>;

    fn public_url(&self, key: &str, bucket: Bucket) -> String;
}
