//! Index of record ids
//!
//! The whole index is one JSON array stored under a single key. Appends go
//! through compare-and-set so concurrent writers against an atomic store do
//! not lose each other's ids.

use crate::error::{RegistryError, Result, StoreError, SubmissionStage};
use crate::record::RecordId;
use crate::store::{bounded, RemoteStore};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

pub struct IndexManager {
    store: Arc<dyn RemoteStore>,
    key: String,
    timeout: Duration,
    max_retries: u32,
}

impl IndexManager {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        key: String,
        timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            store,
            key,
            timeout,
            max_retries,
        }
    }

    /// Current ids in insertion order; a missing or unreadable index is empty
    pub async fn load(&self) -> Result<Vec<RecordId>> {
        let (ids, _) = self.load_raw().await?;
        Ok(ids)
    }

    /// Adds `id` once; ids already present are left as they are
    pub async fn append(&self, id: &str) -> Result<()> {
        for attempt in 0..=self.max_retries {
            let (mut ids, raw) = self
                .load_raw()
                .await
                .map_err(|e| RegistryError::submission(SubmissionStage::Index, e))?;
            if ids.iter().any(|existing| existing == id) {
                debug!("id {} already indexed", id);
                return Ok(());
            }
            ids.push(id.to_string());

            let encoded = encode_index(&ids)?;
            let swapped = bounded(
                self.timeout,
                self.store.compare_and_set(&self.key, &raw, encoded),
            )
            .await
            .map_err(|e| RegistryError::submission(SubmissionStage::Index, e))?;
            if swapped {
                return Ok(());
            }
            debug!(
                "index changed while appending {} (attempt {}), retrying",
                id,
                attempt + 1
            );
        }
        Err(RegistryError::submission(
            SubmissionStage::Index,
            StoreError::Conflict(format!(
                "index append for {} lost {} compare-and-set races",
                id,
                self.max_retries + 1
            )),
        ))
    }

    async fn load_raw(&self) -> std::result::Result<(Vec<RecordId>, Vec<u8>), StoreError> {
        let raw = bounded(self.timeout, self.store.get(&self.key)).await?;
        Ok((decode_index(&raw), raw))
    }
}

pub fn encode_index(ids: &[RecordId]) -> Result<Vec<u8>> {
    serde_json::to_vec(ids).map_err(|e| RegistryError::Encode(e.to_string()))
}

pub fn decode_index(bytes: &[u8]) -> Vec<RecordId> {
    if bytes.is_empty() {
        return Vec::new();
    }
    match serde_json::from_slice::<Vec<RecordId>>(bytes) {
        Ok(ids) => ids,
        Err(e) => {
            warn!("index is not a list of ids, treating as empty: {}", e);
            Vec::new()
        }
    }
}
