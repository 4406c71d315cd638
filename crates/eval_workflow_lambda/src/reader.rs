use std::sync::Arc;

use eval_workflow_core::contract::ManifestRef;
use eval_workflow_core::error::ManifestError;
use eval_workflow_core::manifest::ManifestItems;

use crate::adapters::object_store::{ObjectStore, StoreError};

/// Fetches a manifest object and exposes its items lazily.
#[derive(Clone)]
pub struct BatchItemReader {
    store: Arc<dyn ObjectStore>,
    max_items: Option<usize>,
}

impl BatchItemReader {
    pub fn new(store: Arc<dyn ObjectStore>, max_items: Option<usize>) -> Self {
        Self { store, max_items }
    }

    pub async fn open(&self, manifest: &ManifestRef) -> Result<ManifestItems, ManifestError> {
        let body = self
            .store
            .get_object(&manifest.bucket, &manifest.key)
            .await
            .map_err(|error| match error {
                StoreError::NotFound { .. } => ManifestError::NotFound {
                    bucket: manifest.bucket.clone(),
                    key: manifest.key.clone(),
                },
                StoreError::Request(message) => ManifestError::Unreadable {
                    bucket: manifest.bucket.clone(),
                    key: manifest.key.clone(),
                    message,
                },
            })?;

        Ok(ManifestItems::new(body).with_max_items(self.max_items))
    }
}
