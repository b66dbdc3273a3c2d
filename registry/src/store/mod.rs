//! Remote key/value store boundary
//!
//! The registry only talks to persisted state through `RemoteStore`. Reads
//! are unauthenticated, writes need a signer. An empty value means the key
//! is absent.

use crate::error::StoreError;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

pub mod file;
pub mod memory;
mod segment;

pub use file::FileStore;
pub use memory::MemoryStore;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Cheap availability check; `false` means no other call should be attempted
    async fn is_available(&self) -> bool;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Writes `value` only if the current value equals `expected`.
    ///
    /// The default is a plain read followed by a write and is not atomic;
    /// stores that can do better override it.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: &[u8],
        value: Vec<u8>,
    ) -> Result<bool, StoreError> {
        let current = self.get(key).await?;
        if current != expected {
            return Ok(false);
        }
        self.set(key, value).await?;
        Ok(true)
    }
}

/// Runs a store call with an upper bound on its duration
pub(crate) async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout.as_millis() as u64)),
    }
}
