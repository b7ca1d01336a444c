use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::ObjectStoreSection;

use super::{
    Bucket, ObjectInfo, ObjectStore, ObjectStoreError, StoreResult, StoreStage, UploadReceipt,
};

#[derive(Debug, Clone)]
struct AuthState {
    token: String,
    api_url: String,
    download_url: String,
    account_id: String,
    bucket_ids: HashMap<String, String>,
}

/// B2-style object store client. Authorization is lazy: the first caller
/// performs the account handshake while holding the auth lock, so concurrent
/// callers share a single in-flight authorization. A 401 on any operation
/// drops the cached state and surfaces as retriable.
pub struct B2ObjectStore {
    http: Client,
    config: ObjectStoreSection,
    auth: Mutex<Option<AuthState>>,
}

impl B2ObjectStore {
    pub fn new(config: ObjectStoreSection) -> StoreResult<Self> {
        let http = Client::builder()
            .user_agent("vodforge/0.4")
            .build()
            .map_err(|err| ObjectStoreError::from_transport(StoreStage::Auth, err))?;
        Ok(Self {
            http,
            config,
            auth: Mutex::new(None),
        })
    }

    fn bucket_name(&self, bucket: Bucket) -> &str {
        match bucket {
            Bucket::Source => &self.config.source_bucket,
            Bucket::Output => &self.config.output_bucket,
        }
    }

    async fn auth_state(&self) -> StoreResult<AuthState> {
        let mut guard = self.auth.lock().await;
        if let Some(state) = guard.as_ref() {
            return Ok(state.clone());
        }
        let state = self.authorize().await?;
        *guard = Some(state.clone());
        Ok(state)
    }

    async fn invalidate_auth(&self) {
        let mut guard = self.auth.lock().await;
        *guard = None;
    }

    async fn authorize(&self) -> StoreResult<AuthState> {
        let credentials = format!("{}:{}", self.config.key_id, self.config.application_key);
        let url = format!("{}/b2api/v2/b2_authorize_account", self.config.api_url);
        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Basic {}", BASE64.encode(credentials)))
            .send()
            .await
            .map_err(|err| ObjectStoreError::from_transport(StoreStage::Auth, err))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ObjectStoreError::from_response(StoreStage::Auth, status, &body));
        }
        let payload: AuthorizeResponse = response
            .json()
            .await
            .map_err(|err| ObjectStoreError::from_transport(StoreStage::Auth, err))?;
        debug!(api_url = %payload.api_url, "object store authorized");
        Ok(AuthState {
            token: payload.authorization_token,
            api_url: payload.api_url,
            download_url: payload.download_url,
            account_id: payload.account_id,
            bucket_ids: HashMap::new(),
        })
    }

    async fn bucket_id(&self, bucket: Bucket) -> StoreResult<(AuthState, String)> {
        let name = self.bucket_name(bucket).to_string();
        {
            let guard = self.auth.lock().await;
            if let Some(state) = guard.as_ref() {
                if let Some(id) = state.bucket_ids.get(&name) {
                    return Ok((state.clone(), id.clone()));
                }
            }
        }
        let state = self.auth_state().await?;
        let response = self
            .http
            .post(format!("{}/b2api/v2/b2_list_buckets", state.api_url))
            .header("Authorization", &state.token)
            .json(&serde_json::json!({
                "accountId": state.account_id,
                "bucketName": name,
            }))
            .send()
            .await
            .map_err(|err| ObjectStoreError::from_transport(StoreStage::Auth, err))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::UNAUTHORIZED {
                self.invalidate_auth().await;
            }
            return Err(ObjectStoreError::from_response(StoreStage::Auth, status, &body));
        }
        let payload: ListBucketsResponse = response
            .json()
            .await
            .map_err(|err| ObjectStoreError::from_transport(StoreStage::Auth, err))?;
        let id = payload
            .buckets
            .into_iter()
            .find(|entry| entry.bucket_name == name)
            .map(|entry| entry.bucket_id)
            .ok_or_else(|| {
                ObjectStoreError::new(StoreStage::Auth, false, format!("bucket {name} not found"))
            })?;
        let mut guard = self.auth.lock().await;
        if let Some(state) = guard.as_mut() {
            state.bucket_ids.insert(name, id.clone());
            return Ok((state.clone(), id));
        }
        Ok((state, id))
    }

    async fn check_unauthorized(&self, status: reqwest::StatusCode) {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.invalidate_auth().await;
        }
    }
}

#[async_trait]
impl ObjectStore for B2ObjectStore {
    async fn download(&self, key: &str, local_path: &Path, bucket: Bucket) -> StoreResult<u64> {
        let state = self.auth_state().await?;
        let url = format!(
            "{}/file/{}/{}",
            state.download_url,
            self.bucket_name(bucket),
            key
        );
        let response = self
            .http
            .get(&url)
            .header("Authorization", &state.token)
            .send()
            .await
            .map_err(|err| ObjectStoreError::from_transport(StoreStage::Download, err))?;
        if !response.status().is_success() {
            let status = response.status();
            self.check_unauthorized(status).await;
            let body = response.text().await.unwrap_or_default();
            return Err(ObjectStoreError::from_response(
                StoreStage::Download,
                status,
                &body,
            ));
        }
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| ObjectStoreError::io(StoreStage::Download, err))?;
        }
        let mut file = fs::File::create(local_path)
            .await
            .map_err(|err| ObjectStoreError::io(StoreStage::Download, err))?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let data =
                chunk.map_err(|err| ObjectStoreError::from_transport(StoreStage::Download, err))?;
            file.write_all(&data)
                .await
                .map_err(|err| ObjectStoreError::io(StoreStage::Download, err))?;
            written += data.len() as u64;
        }
        file.flush()
            .await
            .map_err(|err| ObjectStoreError::io(StoreStage::Download, err))?;
        Ok(written)
    }

    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        content_type: &str,
        bucket: Bucket,
    ) -> StoreResult<UploadReceipt> {
        let (state, bucket_id) = self.bucket_id(bucket).await?;
        let target = self
            .http
            .post(format!("{}/b2api/v2/b2_get_upload_url", state.api_url))
            .header("Authorization", &state.token)
            .json(&serde_json::json!({ "bucketId": bucket_id }))
            .send()
            .await
            .map_err(|err| ObjectStoreError::from_transport(StoreStage::Upload, err))?;
        if !target.status().is_success() {
            let status = target.status();
            self.check_unauthorized(status).await;
            let body = target.text().await.unwrap_or_default();
            return Err(ObjectStoreError::from_response(
                StoreStage::Upload,
                status,
                &body,
            ));
        }
        let target: UploadUrlResponse = target
            .json()
            .await
            .map_err(|err| ObjectStoreError::from_transport(StoreStage::Upload, err))?;

        let bytes = fs::read(local_path)
            .await
            .map_err(|err| ObjectStoreError::io(StoreStage::Upload, err))?;
        let size = bytes.len() as u64;
        let checksum = hex::encode(Sha256::digest(&bytes));

        let response = self
            .http
            .post(&target.upload_url)
            .header("Authorization", &target.authorization_token)
            .header("X-Bz-File-Name", encode_file_name(key))
            .header("Content-Type", content_type)
            .header("X-Bz-Content-Sha1", "do_not_verify")
            .header("X-Bz-Info-src_sha256", &checksum)
            .body(bytes)
            .send()
            .await
            .map_err(|err| ObjectStoreError::from_transport(StoreStage::Upload, err))?;
        if !response.status().is_success() {
            let status = response.status();
            self.check_unauthorized(status).await;
            let body = response.text().await.unwrap_or_default();
            return Err(ObjectStoreError::from_response(
                StoreStage::Upload,
                status,
                &body,
            ));
        }
        Ok(UploadReceipt {
            key: key.to_string(),
            size,
            etag: checksum,
            uploaded_at: Utc::now(),
        })
    }

    async fn head(&self, key: &str, bucket: Bucket) -> StoreResult<Option<ObjectInfo>> {
        let state = self.auth_state().await?;
        let url = format!(
            "{}/file/{}/{}",
            state.download_url,
            self.bucket_name(bucket),
            key
        );
        let response = self
            .http
            .head(&url)
            .header("Authorization", &state.token)
            .send()
            .await
            .map_err(|err| ObjectStoreError::from_transport(StoreStage::List, err))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            self.check_unauthorized(status).await;
            return Err(ObjectStoreError::from_response(StoreStage::List, status, ""));
        }
        let size = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        let uploaded_at = response
            .headers()
            .get("x-bz-upload-timestamp")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<i64>().ok())
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single());
        Ok(Some(ObjectInfo {
            key: key.to_string(),
            size,
            content_type,
            uploaded_at,
        }))
    }

    async fn list(&self, prefix: &str, max: usize, bucket: Bucket) -> StoreResult<Vec<ObjectInfo>> {
        let (state, bucket_id) = self.bucket_id(bucket).await?;
        let response = self
            .http
            .post(format!("{}/b2api/v2/b2_list_file_names", state.api_url))
            .header("Authorization", &state.token)
            .json(&serde_json::json!({
                "bucketId": bucket_id,
                "prefix": prefix,
                "maxFileCount": max,
            }))
            .send()
            .await
            .map_err(|err| ObjectStoreError::from_transport(StoreStage::List, err))?;
        if !response.status().is_success() {
            let status = response.status();
            self.check_unauthorized(status).await;
            let body = response.text().await.unwrap_or_default();
            return Err(ObjectStoreError::from_response(StoreStage::List, status, &body));
        }
        let payload: ListFilesResponse = response
            .json()
            .await
            .map_err(|err| ObjectStoreError::from_transport(StoreStage::List, err))?;
        Ok(payload
            .files
            .into_iter()
            .map(|file| ObjectInfo {
                key: file.file_name,
                size: file.content_length,
                content_type: file.content_type,
                uploaded_at: file
                    .upload_timestamp
                    .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
            })
            .collect())
    }

    async fn delete(&self, key: &str, bucket: Bucket) -> StoreResult<()> {
        let (state, bucket_id) = self.bucket_id(bucket).await?;
        let versions = self
            .http
            .post(format!("{}/b2api/v2/b2_list_file_versions", state.api_url))
            .header("Authorization", &state.token)
            .json(&serde_json::json!({
                "bucketId": bucket_id,
                "startFileName": key,
                "prefix": key,
                "maxFileCount": 10,
            }))
            .send()
            .await
            .map_err(|err| ObjectStoreError::from_transport(StoreStage::Delete, err))?;
        if !versions.status().is_success() {
            let status = versions.status();
            self.check_unauthorized(status).await;
            let body = versions.text().await.unwrap_or_default();
            return Err(ObjectStoreError::from_response(
                StoreStage::Delete,
                status,
                &body,
            ));
        }
        let versions: ListVersionsResponse = versions
            .json()
            .await
            .map_err(|err| ObjectStoreError::from_transport(StoreStage::Delete, err))?;
        for version in versions
            .files
            .into_iter()
            .filter(|file| file.file_name == key)
        {
            let response = self
                .http
                .post(format!("{}/b2api/v2/b2_delete_file_version", state.api_url))
                .header("Authorization", &state.token)
                .json(&serde_json::json!({
                    "fileName": version.file_name,
                    "fileId": version.file_id,
                }))
                .send()
                .await
                .map_err(|err| ObjectStoreError::from_transport(StoreStage::Delete, err))?;
            if !response.status().is_success() {
                let status = response.status();
                self.check_unauthorized(status).await;
                let body = response.text().await.unwrap_or_default();
                return Err(ObjectStoreError::from_response(
                    StoreStage::Delete,
                    status,
                    &body,
                ));
            }
        }
        Ok(())
    }

    fn public_url(&self, key: &str, bucket: Bucket) -> String {
        format!(
            "{}/file/{}/{}",
            self.config.api_url,
            self.bucket_name(bucket),
            key
        )
    }
}

/// B2 requires percent-encoded file names; '/' separators stay literal.
fn encode_file_name(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'/' | b'.' | b'-' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeResponse {
    authorization_token: String,
    api_url: String,
    download_url: String,
    account_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListBucketsResponse {
    buckets: Vec<BucketEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketEntry {
    bucket_id: String,
    bucket_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrlResponse {
    upload_url: String,
    authorization_token: String,
}

#[derive(Debug, Deserialize)]
struct ListFilesResponse {
    files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileEntry {
    file_name: String,
    content_length: u64,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    upload_timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ListVersionsResponse {
    files: Vec<VersionEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionEntry {
    file_name: String,
    file_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_encoding() {
        assert_eq!(encode_file_name("videos/a.mp4"), "videos/a.mp4");
        assert_eq!(encode_file_name("a b.mp4"), "a%20b.mp4");
    }

    #[test]
    fn response_classification() {
        let err = ObjectStoreError::from_response(
            StoreStage::Download,
            reqwest::StatusCode::NOT_FOUND,
            "no such file",
        );
        assert!(!err.retriable);
        let err = ObjectStoreError::from_response(
            StoreStage::Download,
            reqwest::StatusCode::SERVICE_UNAVAILABLE,
            "",
        );
        assert!(err.retriable);
        let err = ObjectStoreError::from_response(
            StoreStage::Upload,
            reqwest::StatusCode::UNAUTHORIZED,
            "",
        );
        assert!(err.retriable);
    }
}
