//! In-process object store used by tests and local dry runs.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::adapters::object_store::{ObjectStore, StoreError};

#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    denied_suffix: Option<String>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes to keys ending in `suffix` fail with a request error.
    pub fn deny_writes_ending_with(suffix: impl Into<String>) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            denied_suffix: Some(suffix.into()),
        }
    }

    pub fn seed_object(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        self.lock()
            .insert((bucket.to_string(), key.to_string()), body.into());
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.lock()
            .keys()
            .filter(|(object_bucket, _)| object_bucket == bucket)
            .map(|(_, key)| key.clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<(String, String), Vec<u8>>> {
        // A panicked writer leaves the map consistent; keep serving it.
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        match self.object(bucket, key) {
            Some(body) => Ok(body),
            None => Err(StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), StoreError> {
        if let Some(suffix) = &self.denied_suffix {
            if key.ends_with(suffix.as_str()) {
                let message = format!("simulated write failure for key: {key}");
                return Err(StoreError::Request(message));
            }
        }
        self.seed_object(bucket, key, body);
        Ok(())
    }
}
