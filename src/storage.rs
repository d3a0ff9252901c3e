use crate::http::build_client;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected status: HTTP {0}")]
    Status(u16),
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Keyed put/get over durable object storage. Writes are independent puts
/// with no read-modify-write, so implementations need no locking beyond
/// their own transport.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str)
    -> Result<(), StorageError>;

    /// `Ok(None)` is an ordinary miss, not an error.
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StorageError>;
}

/// Supabase Storage backend, driven through its REST object API.
#[derive(Debug, Clone)]
pub struct SupabaseStorage {
    base_url: String,
    service_key: String,
    bucket: String,
    http: Client,
}

impl SupabaseStorage {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        let bucket = std::env::var("SUPABASE_STORAGE_BUCKET")
            .unwrap_or_else(|_| "product-images".to_string());
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            bucket,
            http: build_client(),
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket, key
        )
    }
}

#[async_trait]
impl ObjectStore for SupabaseStorage {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let response = self
            .http
            .post(self.object_url(key))
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await
            .map_err(|err| StorageError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(StorageError::Status(response.status().as_u16()));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StorageError> {
        let response = self
            .http
            .get(self.object_url(key))
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .send()
            .await
            .map_err(|err| StorageError::Request(err.to_string()))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(StorageError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| StorageError::Request(err.to_string()))?;

        Ok(Some(StoredObject {
            bytes: bytes.to_vec(),
            content_type,
        }))
    }
}

/// In-process store for tests and storage-less deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl MemoryStore {
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StorageError> {
        Ok(self.objects.read().await.get(key).cloned())
    }
}
