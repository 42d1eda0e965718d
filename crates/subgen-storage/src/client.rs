//! S3-compatible blob store client.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::retry::BackoffPolicy;

/// Object metadata key carrying the content hash used for idempotent
/// uploads.
const CHECKSUM_METADATA_KEY: &str = "content-sha256";

/// The blob operations the pipeline needs from an object store.
///
/// Keys are always paired with a per-job `namespace` prefix; deleting a
/// namespace is safe because namespaces are partitioned by job.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload a local file, returning the full remote key. Idempotent:
    /// if the object already exists with the same content hash, no bytes
    /// are transferred.
    async fn put(
        &self,
        namespace: &str,
        key: &str,
        local_path: &Path,
        checksum: &str,
    ) -> StorageResult<String>;

    /// Whether an object exists under the namespace.
    async fn exists(&self, namespace: &str, key: &str) -> StorageResult<bool>;

    /// Delete every object under the namespace. Returns the number
    /// removed.
    async fn delete_prefix(&self, namespace: &str) -> StorageResult<u32>;
}

/// Configuration for the S3-compatible client.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 API endpoint URL
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket_name: String,
    /// Region ("auto" for R2-style providers)
    pub region: String,
}

impl S3Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("SUBGEN_S3_ENDPOINT_URL")
                .map_err(|_| StorageError::config_error("SUBGEN_S3_ENDPOINT_URL not set"))?,
            access_key_id: std::env::var("SUBGEN_S3_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("SUBGEN_S3_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("SUBGEN_S3_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("SUBGEN_S3_SECRET_ACCESS_KEY not set"))?,
            bucket_name: std::env::var("SUBGEN_S3_BUCKET")
                .map_err(|_| StorageError::config_error("SUBGEN_S3_BUCKET not set"))?,
            region: std::env::var("SUBGEN_S3_REGION").unwrap_or_else(|_| "auto".to_string()),
        })
    }
}

/// S3-compatible blob store with bounded retries on every operation.
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    backoff: BackoffPolicy,
}

impl S3BlobStore {
    /// Create a new client from configuration.
    pub fn new(config: S3Config, backoff: BackoffPolicy) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "subgen",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name,
            backoff,
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self::new(S3Config::from_env()?, BackoffPolicy::default()))
    }

    fn full_key(namespace: &str, key: &str) -> String {
        format!("{}/{}", namespace.trim_end_matches('/'), key)
    }

    /// Content hash recorded on the remote object, if it exists.
    async fn remote_checksum(&self, full_key: &str) -> StorageResult<Option<String>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(full_key)
            .send()
            .await
        {
            Ok(head) => Ok(head
                .metadata()
                .and_then(|m| m.get(CHECKSUM_METADATA_KEY))
                .cloned()),
            Err(e) => {
                let message = e.to_string();
                if message.contains("NotFound") || message.contains("NoSuchKey") {
                    Ok(None)
                } else {
                    Err(StorageError::from_sdk("get", message))
                }
            }
        }
    }

    async fn list_keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| StorageError::from_sdk("list", e.to_string()))?;

            if let Some(ref contents) = response.contents {
                keys.extend(contents.iter().filter_map(|o| o.key.clone()));
            }

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token;
            } else {
                break;
            }
        }

        Ok(keys)
    }

    async fn delete_keys(&self, keys: &[String]) -> StorageResult<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let objects: Vec<_> = keys
            .iter()
            .filter_map(|k| {
                aws_sdk_s3::types::ObjectIdentifier::builder()
                    .key(k)
                    .build()
                    .ok()
            })
            .collect();

        let delete = aws_sdk_s3::types::Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        self.client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| StorageError::from_sdk("delete", e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(
        &self,
        namespace: &str,
        key: &str,
        local_path: &Path,
        checksum: &str,
    ) -> StorageResult<String> {
        let full_key = Self::full_key(namespace, key);

        self.backoff
            .run("put", || {
                let full_key = full_key.clone();
                async move {
                    if self.remote_checksum(&full_key).await?.as_deref() == Some(checksum) {
                        debug!("Blob {} already present with matching hash", full_key);
                        return Ok(());
                    }

                    let body = ByteStream::from_path(local_path)
                        .await
                        .map_err(|e| StorageError::upload_failed(e.to_string()))?;

                    self.client
                        .put_object()
                        .bucket(&self.bucket)
                        .key(&full_key)
                        .body(body)
                        .content_type("video/mp4")
                        .metadata(CHECKSUM_METADATA_KEY, checksum)
                        .send()
                        .await
                        .map_err(|e| StorageError::from_sdk("put", e.to_string()))?;

                    info!("Uploaded {} to {}", local_path.display(), full_key);
                    Ok(())
                }
            })
            .await?;

        Ok(full_key)
    }

    async fn exists(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        let full_key = Self::full_key(namespace, key);
        self.backoff
            .run("head", || {
                let full_key = full_key.clone();
                async move { Ok(self.remote_checksum(&full_key).await?.is_some()) }
            })
            .await
    }

    async fn delete_prefix(&self, namespace: &str) -> StorageResult<u32> {
        let prefix = format!("{}/", namespace.trim_end_matches('/'));

        self.backoff
            .run("delete_prefix", || {
                let prefix = prefix.clone();
                async move {
                    let keys = self.list_keys(&prefix).await?;
                    let count = keys.len() as u32;
                    self.delete_keys(&keys).await?;
                    if count > 0 {
                        info!("Deleted {} blobs under {}", count, prefix);
                    }
                    Ok(count)
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_key_joins_namespace() {
        assert_eq!(
            S3BlobStore::full_key("jobs/abc", "seg_0.mp4"),
            "jobs/abc/seg_0.mp4"
        );
        assert_eq!(
            S3BlobStore::full_key("jobs/abc/", "seg_0.mp4"),
            "jobs/abc/seg_0.mp4"
        );
    }

    #[test]
    fn test_sdk_error_classification() {
        assert!(matches!(
            StorageError::from_sdk("put", "AccessDenied: nope".to_string()),
            StorageError::AccessDenied(_)
        ));
        assert!(matches!(
            StorageError::from_sdk("put", "connection reset".to_string()),
            StorageError::UploadFailed(_)
        ));
        assert!(matches!(
            StorageError::from_sdk("list", "timeout".to_string()),
            StorageError::ListFailed(_)
        ));
    }
}
