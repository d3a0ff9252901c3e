use crate::http::build_client;
use crate::storage::ObjectStore;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::warn;

pub const MAX_MIRRORED_IMAGES: usize = 5;

// Source CDNs serve JPEG regardless of extension; the original assets are
// not kept, so the stored copy is tagged with the one type we request.
const MIRROR_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Debug, Clone, Serialize)]
pub struct MirroredImage {
    pub storage_key: String,
    pub content_type: String,
}

pub struct ImageMirror {
    http: Client,
    store: Arc<dyn ObjectStore>,
}

impl ImageMirror {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            http: build_client(),
            store,
        }
    }

    /// Best-effort batch mirror: failures skip the candidate, never abort
    /// the batch, and the result preserves input order. Output length is
    /// `0..=min(5, urls.len())` with no 1:1 correspondence guaranteed.
    pub async fn mirror(&self, urls: &[String]) -> Vec<MirroredImage> {
        let http = self.http.clone();
        mirror_with(urls, self.store.as_ref(), move |url| {
            let http = http.clone();
            async move { download(http, url).await }
        })
        .await
    }
}

async fn download(http: Client, url: String) -> Result<Vec<u8>, String> {
    let response = http.get(&url).send().await.map_err(|err| err.to_string())?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("HTTP {status}"));
    }
    let bytes = response.bytes().await.map_err(|err| err.to_string())?;
    Ok(bytes.to_vec())
}

/// Downloads run concurrently (they are independent), but results land in
/// ordinal-indexed slots so completion order never leaks into the output.
pub(crate) async fn mirror_with<F, Fut>(
    urls: &[String],
    store: &dyn ObjectStore,
    fetch: F,
) -> Vec<MirroredImage>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<Vec<u8>, String>> + Send + 'static,
{
    let candidates = &urls[..urls.len().min(MAX_MIRRORED_IMAGES)];
    if candidates.is_empty() {
        return Vec::new();
    }

    let mut tasks = JoinSet::new();
    for (ordinal, url) in candidates.iter().enumerate() {
        let fut = fetch(url.clone());
        tasks.spawn(async move { (ordinal, fut.await) });
    }

    let mut slots: Vec<Option<Vec<u8>>> = vec![None; candidates.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((ordinal, Ok(bytes))) => slots[ordinal] = Some(bytes),
            Ok((ordinal, Err(reason))) => {
                warn!(
                    target = "torii.storage",
                    ordinal, reason, "image_download_skipped"
                );
            }
            Err(err) => {
                warn!(target = "torii.storage", error = %err, "image_task_panicked");
            }
        }
    }

    let batch_stamp = Utc::now().timestamp_millis();
    let mut mirrored = Vec::new();
    for (ordinal, slot) in slots.into_iter().enumerate() {
        let Some(bytes) = slot else { continue };
        let storage_key = format!("product-{batch_stamp}-{ordinal}.jpg");
        match store.put(&storage_key, bytes, MIRROR_CONTENT_TYPE).await {
            Ok(()) => mirrored.push(MirroredImage {
                storage_key,
                content_type: MIRROR_CONTENT_TYPE.to_string(),
            }),
            Err(err) => {
                warn!(
                    target = "torii.storage",
                    ordinal, error = %err, "image_store_skipped"
                );
            }
        }
    }
    mirrored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, StorageError, StoredObject};
    use async_trait::async_trait;

    fn urls(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("https://sc04.alicdn.com/kf/item-{i}.jpg"))
            .collect()
    }

    fn fetch_failing_at(failures: &'static [usize]) -> impl Fn(String) -> FetchFut {
        move |url: String| {
            let fail = failures
                .iter()
                .any(|idx| url.ends_with(&format!("item-{idx}.jpg")));
            Box::pin(async move {
                if fail {
                    Err("HTTP 403".to_string())
                } else {
                    Ok(url.into_bytes())
                }
            })
        }
    }

    type FetchFut =
        std::pin::Pin<Box<dyn Future<Output = Result<Vec<u8>, String>> + Send + 'static>>;

    #[tokio::test]
    async fn partial_failures_keep_the_rest_in_order() {
        let store = MemoryStore::default();
        // Seven candidates, the 2nd and 5th fail: only the first five are
        // attempted at all, three survive.
        let mirrored = mirror_with(&urls(7), &store, fetch_failing_at(&[1, 4])).await;
        assert_eq!(mirrored.len(), 3);
        assert!(mirrored[0].storage_key.ends_with("-0.jpg"));
        assert!(mirrored[1].storage_key.ends_with("-2.jpg"));
        assert!(mirrored[2].storage_key.ends_with("-3.jpg"));
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn never_more_than_cap_even_when_all_succeed() {
        let store = MemoryStore::default();
        let mirrored = mirror_with(&urls(9), &store, fetch_failing_at(&[])).await;
        assert_eq!(mirrored.len(), MAX_MIRRORED_IMAGES);
    }

    #[tokio::test]
    async fn empty_input_mirrors_nothing() {
        let store = MemoryStore::default();
        let mirrored = mirror_with(&[], &store, fetch_failing_at(&[])).await;
        assert!(mirrored.is_empty());
    }

    #[tokio::test]
    async fn content_type_is_jpeg_default() {
        let store = MemoryStore::default();
        let mirrored = mirror_with(&urls(1), &store, fetch_failing_at(&[])).await;
        assert_eq!(mirrored[0].content_type, "image/jpeg");
        let stored = store.get(&mirrored[0].storage_key).await.unwrap().unwrap();
        assert_eq!(stored.content_type, "image/jpeg");
    }

    struct RejectingStore;

    #[async_trait]
    impl ObjectStore for RejectingStore {
        async fn put(
            &self,
            _key: &str,
            _bytes: Vec<u8>,
            _content_type: &str,
        ) -> Result<(), StorageError> {
            Err(StorageError::Status(503))
        }

        async fn get(&self, _key: &str) -> Result<Option<StoredObject>, StorageError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn store_failures_are_skipped_not_raised() {
        let mirrored = mirror_with(&urls(3), &RejectingStore, fetch_failing_at(&[])).await;
        assert!(mirrored.is_empty());
    }
}
