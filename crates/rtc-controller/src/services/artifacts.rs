//! Storage artifact resolver.
//!
//! Moves recording output out of the provider-side bucket: each object is
//! fetched through a signed URL, rehosted by the application file manager,
//! and then deleted from the bucket.
//!
//! The HTTP implementation talks to two internal services:
//!
//! - storage gateway: `GET /objects?prefix=`, `GET /objects/{key}/signed-url`,
//!   `DELETE /objects/{key}`
//! - file manager: `POST /files/upload-from-url`

use crate::config::ArtifactStoreConfig;
use crate::errors::RtcError;
use crate::models::StoredArtifact;
use crate::observability::metrics;
use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{instrument, warn};

/// Connect timeout for storage requests.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Rehosts provider-side storage objects into durable file handles.
#[async_trait]
pub trait ArtifactResolver: Send + Sync {
    /// Rehost every object under `prefix`.
    async fn resolve_by_prefix(&self, prefix: &str) -> Result<Vec<StoredArtifact>, RtcError>;

    /// Rehost the given object keys, preserving order.
    async fn resolve_by_keys(&self, keys: &[String]) -> Result<Vec<StoredArtifact>, RtcError>;
}

#[derive(Debug, Deserialize)]
struct ObjectListing {
    objects: Vec<ObjectEntry>,
}

#[derive(Debug, Deserialize)]
struct ObjectEntry {
    key: String,
}

#[derive(Debug, Deserialize)]
struct SignedUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    id: String,
}

/// HTTP implementation of [`ArtifactResolver`].
pub struct HttpArtifactResolver {
    client: Client,
    storage_gateway_url: Url,
    file_manager_url: Url,
}

impl HttpArtifactResolver {
    /// # Errors
    ///
    /// - `RtcError::InvalidArgument` if either base URL does not parse
    /// - `RtcError::Internal` if the HTTP client cannot be built
    pub fn new(config: &ArtifactStoreConfig, timeout: Duration) -> Result<Self, RtcError> {
        let parse = |name: &str, value: &str| {
            Url::parse(value)
                .map_err(|e| RtcError::InvalidArgument(format!("{name} is not a valid URL: {e}")))
        };
        let storage_gateway_url = parse("STORAGE_GATEWAY_URL", &config.storage_gateway_url)?;
        let file_manager_url = parse("FILE_MANAGER_URL", &config.file_manager_url)?;

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                tracing::error!(target: "rtc.services.artifacts", error = %e, "Failed to build HTTP client");
                RtcError::Internal
            })?;

        Ok(Self {
            client,
            storage_gateway_url,
            file_manager_url,
        })
    }

    /// `{base}/{segments...}` with each segment percent-encoded, so object
    /// keys containing `/` stay one path segment.
    fn url(base: &Url, segments: &[&str]) -> Result<Url, RtcError> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|()| RtcError::InvalidArgument(format!("{base} cannot be a base URL")))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, RtcError> {
        let mut url = Self::url(&self.storage_gateway_url, &["objects"])?;
        url.query_pairs_mut().append_pair("prefix", prefix);

        let start = Instant::now();
        let result = self.get_json::<ObjectListing>(url, "list_objects").await;
        metrics::record_remote_call("list_objects", status_label(&result), start.elapsed());

        Ok(result?.objects.into_iter().map(|o| o.key).collect())
    }

    /// Signed URL -> file manager upload -> delete source.
    async fn rehost(&self, key: &str) -> Result<StoredArtifact, RtcError> {
        let start = Instant::now();
        let result = self.copy_to_file_manager(key).await;
        metrics::record_remote_call("rehost_object", status_label(&result), start.elapsed());
        let file_id = result?;

        let start = Instant::now();
        let deleted = self.delete(key).await;
        metrics::record_remote_call("delete_object", status_label(&deleted), start.elapsed());
        deleted?;

        Ok(StoredArtifact {
            file_id,
            source_key: key.to_string(),
        })
    }

    async fn copy_to_file_manager(&self, key: &str) -> Result<String, RtcError> {
        let url = Self::url(&self.storage_gateway_url, &["objects", key, "signed-url"])?;
        let signed: SignedUrl = self.get_json(url, "signed_url").await?;

        let upload_url = Self::url(&self.file_manager_url, &["files", "upload-from-url"])?;
        let response = self
            .client
            .post(upload_url)
            .json(&json!({ "url": signed.url }))
            .send()
            .await
            .map_err(|e| upstream("upload_from_url", &e))?;
        let uploaded: UploadedFile = Self::read_json(response, "upload_from_url").await?;
        Ok(uploaded.id)
    }

    async fn delete(&self, key: &str) -> Result<(), RtcError> {
        let url = Self::url(&self.storage_gateway_url, &["objects", key])?;
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| upstream("delete_object", &e))?;

        // Already gone counts as deleted.
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            warn!(target: "rtc.services.artifacts", status = %status, "Storage gateway refused delete");
            Err(RtcError::Upstream(format!("delete_object: HTTP {status}")))
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        operation: &str,
    ) -> Result<T, RtcError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| upstream(operation, &e))?;
        Self::read_json(response, operation).await
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        operation: &str,
    ) -> Result<T, RtcError> {
        let status = response.status();
        if !status.is_success() {
            warn!(target: "rtc.services.artifacts", status = %status, operation, "Storage request failed");
            return Err(RtcError::Upstream(format!("{operation}: HTTP {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| upstream(operation, &e))
    }
}

fn upstream(operation: &str, err: &reqwest::Error) -> RtcError {
    warn!(target: "rtc.services.artifacts", error = %err, operation, "Storage request failed");
    RtcError::Upstream(format!("{operation}: {err}"))
}

fn status_label<T>(result: &Result<T, RtcError>) -> &'static str {
    if result.is_ok() {
        "success"
    } else {
        "error"
    }
}

#[async_trait]
impl ArtifactResolver for HttpArtifactResolver {
    #[instrument(skip_all, name = "rtc.artifacts.resolve_by_prefix", fields(prefix = %prefix))]
    async fn resolve_by_prefix(&self, prefix: &str) -> Result<Vec<StoredArtifact>, RtcError> {
        let keys = self.list(prefix).await?;
        self.resolve_by_keys(&keys).await
    }

    #[instrument(skip_all, name = "rtc.artifacts.resolve_by_keys", fields(count = keys.len()))]
    async fn resolve_by_keys(&self, keys: &[String]) -> Result<Vec<StoredArtifact>, RtcError> {
        try_join_all(keys.iter().map(|key| self.rehost(key))).await
    }
}

/// Mock resolver for testing.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory bucket. Rehosting an object yields `file-{key}` and
    /// removes the key from the bucket; asking for a key that is no longer
    /// there fails the way the storage gateway does.
    #[derive(Default)]
    pub struct MockArtifactResolver {
        objects: Mutex<Vec<String>>,
        fail: bool,
        call_count: AtomicUsize,
    }

    impl MockArtifactResolver {
        pub fn new() -> Self {
            Self::default()
        }

        /// A bucket pre-filled with object keys.
        pub fn with_objects(keys: &[&str]) -> Self {
            Self {
                objects: Mutex::new(keys.iter().map(|k| (*k).to_string()).collect()),
                ..Self::default()
            }
        }

        /// A resolver whose every call fails with `Upstream`.
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        /// Keys still in the bucket.
        pub fn remaining(&self) -> Vec<String> {
            self.objects.lock().map(|o| o.clone()).unwrap_or_default()
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        fn take(&self, keys: &[String]) -> Result<Vec<StoredArtifact>, RtcError> {
            let mut objects = self
                .objects
                .lock()
                .map_err(|_| RtcError::Upstream("mock bucket poisoned".to_string()))?;
            if let Some(missing) = keys.iter().find(|k| !objects.contains(k)) {
                return Err(RtcError::Upstream(format!(
                    "signed_url: object {missing} not found"
                )));
            }
            objects.retain(|o| !keys.contains(o));
            Ok(keys
                .iter()
                .map(|key| StoredArtifact {
                    file_id: format!("file-{key}"),
                    source_key: key.clone(),
                })
                .collect())
        }
    }

    #[async_trait]
    impl ArtifactResolver for MockArtifactResolver {
        async fn resolve_by_prefix(&self, prefix: &str) -> Result<Vec<StoredArtifact>, RtcError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RtcError::Upstream("mock storage failure".to_string()));
            }
            let keys: Vec<String> = self
                .remaining()
                .into_iter()
                .filter(|k| k.starts_with(prefix))
                .collect();
            self.take(&keys)
        }

        async fn resolve_by_keys(&self, keys: &[String]) -> Result<Vec<StoredArtifact>, RtcError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RtcError::Upstream("mock storage failure".to_string()));
            }
            self.take(keys)
        }
    }
}
