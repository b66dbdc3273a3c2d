//! Record synchronizer
//!
//! Keeps a locally cached, timestamp-ordered snapshot of every record listed
//! in the index, and performs the two mutations the registry supports:
//! registering a new record and moving a pending record to a terminal status.
//!
//! Every refresh takes a token when it starts. A finished refresh installs its
//! result only if no refresh that started later has been installed already,
//! so a slow, stale refresh can never overwrite a fresher snapshot.

use crate::config::RuntimeConfig;
use crate::error::{RegistryError, Result, SubmissionStage};
use crate::index::IndexManager;
use crate::metrics::{record_metrics, SKIPPED_RECORDS, SUPERSEDED_REFRESHES};
use crate::record::{self, RecordId, RecordStatus, RegistrationInput, VoterRecord};
use crate::sealer::{PlaceholderSealer, Sealer};
use crate::store::{bounded, RemoteStore};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Records as of one completed refresh, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Token of the refresh that produced this snapshot; 0 before the first one
    pub token: u64,
    pub records: Vec<VoterRecord>,
}

/// Per-status record counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub total: usize,
    pub pending: usize,
    pub verified: usize,
    pub rejected: usize,
}

impl Snapshot {
    pub fn stats(&self) -> Stats {
        self.records
            .iter()
            .fold(Stats::default(), |mut stats, record| {
                stats.total += 1;
                match record.status {
                    RecordStatus::Pending => stats.pending += 1,
                    RecordStatus::Verified => stats.verified += 1,
                    RecordStatus::Rejected => stats.rejected += 1,
                }
                stats
            })
    }
}

pub struct Synchronizer {
    store: Arc<dyn RemoteStore>,
    index: IndexManager,
    config: RuntimeConfig,
    sealer: Arc<dyn Sealer>,
    snapshot: RwLock<Arc<Snapshot>>,
    next_token: AtomicU64,
}

impl Synchronizer {
    pub fn new(store: Arc<dyn RemoteStore>, config: RuntimeConfig) -> Self {
        let index = IndexManager::new(
            store.clone(),
            config.index_key.clone(),
            config.store_timeout(),
            config.append_max_retries,
        );
        Self {
            store,
            index,
            config,
            sealer: Arc::new(PlaceholderSealer),
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            next_token: AtomicU64::new(0),
        }
    }

    pub fn with_sealer(mut self, sealer: Arc<dyn Sealer>) -> Self {
        self.sealer = sealer;
        self
    }

    pub fn principal(&self) -> &str {
        &self.config.principal
    }

    pub fn index(&self) -> &IndexManager {
        &self.index
    }

    /// The snapshot installed by the most recent refresh
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn records(&self) -> Vec<VoterRecord> {
        self.snapshot().records.clone()
    }

    pub fn stats(&self) -> Stats {
        self.snapshot().stats()
    }

    /// Cached records created by `principal`
    pub fn owned_by(&self, principal: &str) -> Vec<VoterRecord> {
        self.snapshot()
            .records
            .iter()
            .filter(|record| record.owner == principal)
            .cloned()
            .collect()
    }

    /// Re-reads the index and every record and replaces the cached snapshot.
    ///
    /// Records that cannot be fetched or decoded are skipped. Returns the
    /// records of whichever snapshot is installed once this refresh finishes.
    pub async fn refresh(&self) -> Result<Vec<VoterRecord>> {
        record_metrics("refresh", || self.refresh_inner()).await
    }

    /// Creates a pending record owned by this synchronizer's principal
    pub async fn register(&self, input: RegistrationInput) -> Result<RecordId> {
        record_metrics("register", || self.register_inner(input)).await
    }

    /// Moves a pending record to `new_status`; only its owner may do so
    pub async fn transition(
        &self,
        id: &str,
        new_status: RecordStatus,
        acting_principal: &str,
    ) -> Result<()> {
        record_metrics("transition", || {
            self.transition_inner(id, new_status, acting_principal)
        })
        .await
    }

    pub async fn verify(&self, id: &str, acting_principal: &str) -> Result<()> {
        self.transition(id, RecordStatus::Verified, acting_principal)
            .await
    }

    pub async fn reject(&self, id: &str, acting_principal: &str) -> Result<()> {
        self.transition(id, RecordStatus::Rejected, acting_principal)
            .await
    }

    /// Fetches one record straight from the store; `None` when absent
    pub async fn record(&self, id: &str) -> Result<Option<VoterRecord>> {
        let key = self.config.record_key(id);
        let bytes = bounded(self.config.store_timeout(), self.store.get(&key)).await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        let record = record::decode(&bytes)?;
        if record.id != id {
            return Err(RegistryError::Decode(format!(
                "body under {} carries id {}",
                key, record.id
            )));
        }
        Ok(Some(record))
    }

    /// Plaintext of a record's sealed field, for its owner only
    pub fn reveal(&self, record: &VoterRecord, acting_principal: &str) -> Result<String> {
        if record.owner != acting_principal {
            return Err(RegistryError::Authorization {
                id: record.id.clone(),
                principal: acting_principal.to_string(),
            });
        }
        self.sealer.unseal(&record.encrypted_data)
    }

    async fn ensure_available(&self) -> Result<()> {
        if self.store.is_available().await {
            Ok(())
        } else {
            Err(RegistryError::Transient("store unavailable".to_string()))
        }
    }

    async fn refresh_inner(&self) -> Result<Vec<VoterRecord>> {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        self.ensure_available().await?;

        let ids = self.index.load().await?;
        let mut records = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.record(id).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {
                    warn!("record {} is indexed but absent, skipping", id);
                    SKIPPED_RECORDS.inc();
                }
                Err(e) => {
                    warn!("skipping record {}: {}", id, e);
                    SKIPPED_RECORDS.inc();
                }
            }
        }
        // sort_by is stable, equal timestamps keep index order
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        debug!(
            "refresh {} loaded {} of {} records",
            token,
            records.len(),
            ids.len()
        );
        Ok(self.install(token, records))
    }

    fn install(&self, token: u64, records: Vec<VoterRecord>) -> Vec<VoterRecord> {
        let mut current = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        if token > current.token {
            *current = Arc::new(Snapshot { token, records });
        } else {
            debug!(
                "refresh {} finished after refresh {} was applied, discarding",
                token, current.token
            );
            SUPERSEDED_REFRESHES.inc();
        }
        current.records.clone()
    }

    /// Refresh following a successful write; its failure does not undo the write
    async fn refresh_after_write(&self) {
        if let Err(e) = self.refresh_inner().await {
            warn!("refresh after write failed: {}", e);
        }
    }

    async fn register_inner(&self, input: RegistrationInput) -> Result<RecordId> {
        self.ensure_available().await?;

        let record = VoterRecord::new(
            self.config.principal.clone(),
            input.region,
            input.age_group,
            self.sealer.seal(&input.sensitive_info),
        );
        let id = record.id.clone();
        let body = record::encode(&record)?;

        // Record before index: an indexed id always has a body behind it
        bounded(
            self.config.store_timeout(),
            self.store.set(&self.config.record_key(&id), body),
        )
        .await
        .map_err(|e| RegistryError::submission(SubmissionStage::Record, e))?;

        if let Err(e) = self.index.append(&id).await {
            error!("record {} was written but not indexed: {}", id, e);
            return Err(e);
        }
        info!("registered record {} for {}", id, record.owner);

        self.refresh_after_write().await;
        Ok(id)
    }

    async fn transition_inner(
        &self,
        id: &str,
        new_status: RecordStatus,
        acting_principal: &str,
    ) -> Result<()> {
        self.ensure_available().await?;

        let current = match self.record(id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(RegistryError::NotFound(id.to_string())),
            Err(RegistryError::Decode(e)) => {
                warn!("record {} is not decodable: {}", id, e);
                return Err(RegistryError::NotFound(id.to_string()));
            }
            Err(e) => return Err(e),
        };

        if current.owner != acting_principal {
            return Err(RegistryError::Authorization {
                id: id.to_string(),
                principal: acting_principal.to_string(),
            });
        }
        if !current.is_pending() || !new_status.is_terminal() {
            return Err(RegistryError::InvalidTransition {
                id: id.to_string(),
                from: current.status,
                to: new_status,
            });
        }

        let body = record::encode(&current.with_status(new_status))?;
        bounded(
            self.config.store_timeout(),
            self.store.set(&self.config.record_key(id), body),
        )
        .await
        .map_err(|e| RegistryError::submission(SubmissionStage::Record, e))?;
        info!("record {} is now {}", id, new_status);

        self.refresh_after_write().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn record_with(id: &str, timestamp: u64, owner: &str) -> VoterRecord {
        VoterRecord {
            id: id.to_string(),
            encrypted_data: PlaceholderSealer.seal("secret"),
            timestamp,
            owner: owner.to_string(),
            region: "North".to_string(),
            age_group: "18-30".to_string(),
            status: RecordStatus::Pending,
        }
    }

    fn seed(store: &MemoryStore, records: &[VoterRecord]) {
        let ids: Vec<RecordId> = records.iter().map(|r| r.id.clone()).collect();
        for record in records {
            store.insert(
                &format!("record_{}", record.id),
                record::encode(record).unwrap(),
            );
        }
        store.insert("record_keys", crate::index::encode_index(&ids).unwrap());
    }

    fn synchronizer(store: Arc<MemoryStore>) -> Synchronizer {
        Synchronizer::new(store, RuntimeConfig::new().with_principal("alice"))
    }

    #[tokio::test]
    async fn test_equal_timestamps_keep_index_order() {
        let store = Arc::new(MemoryStore::new());
        seed(
            &store,
            &[
                record_with("x", 50, "alice"),
                record_with("y", 50, "alice"),
                record_with("z", 60, "alice"),
            ],
        );
        let sync = synchronizer(store);

        for _ in 0..3 {
            let ids: Vec<String> = sync
                .refresh()
                .await
                .unwrap()
                .into_iter()
                .map(|r| r.id)
                .collect();
            assert_eq!(ids, vec!["z", "x", "y"]);
        }
    }

    #[tokio::test]
    async fn test_late_refresh_does_not_overwrite_newer_snapshot() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, &[record_with("a", 100, "alice")]);
        let sync = Arc::new(synchronizer(store.clone()));

        store.set_read_delay(Some(Duration::from_millis(200)));
        let slow = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.set_read_delay(None);
        seed(
            &store,
            &[record_with("a", 100, "alice"), record_with("b", 200, "alice")],
        );

        let fresh = sync.refresh().await.unwrap();
        assert_eq!(fresh.len(), 2);
        let fresh_token = sync.snapshot().token;

        let late = slow.await.unwrap().unwrap();
        assert_eq!(late.len(), 2);
        assert_eq!(sync.records().len(), 2);
        assert_eq!(sync.snapshot().token, fresh_token);
    }

    #[tokio::test]
    async fn test_slow_store_times_out_as_transient() {
        let store = Arc::new(MemoryStore::new());
        store.set_read_delay(Some(Duration::from_millis(500)));
        let mut config = RuntimeConfig::new();
        config.store_timeout_ms = 20;
        let sync = Synchronizer::new(store, config);

        let err = sync.refresh().await.unwrap_err();
        assert!(matches!(err, RegistryError::Transient(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_stats_and_owned_by() {
        let store = Arc::new(MemoryStore::new());
        let mut verified = record_with("v", 3, "bob");
        verified.status = RecordStatus::Verified;
        let mut rejected = record_with("r", 2, "alice");
        rejected.status = RecordStatus::Rejected;
        seed(&store, &[record_with("p", 1, "alice"), verified, rejected]);
        let sync = synchronizer(store);
        sync.refresh().await.unwrap();

        assert_eq!(
            sync.stats(),
            Stats {
                total: 3,
                pending: 1,
                verified: 1,
                rejected: 1
            }
        );
        let mine: Vec<String> = sync.owned_by("alice").into_iter().map(|r| r.id).collect();
        assert_eq!(mine, vec!["r", "p"]);
    }

    #[tokio::test]
    async fn test_reveal_is_owner_only() {
        let store = Arc::new(MemoryStore::new());
        let sync = synchronizer(store);
        let record = record_with("a", 1, "alice");

        assert_eq!(sync.reveal(&record, "alice").unwrap(), "secret");
        assert!(matches!(
            sync.reveal(&record, "mallory"),
            Err(RegistryError::Authorization { .. })
        ));
    }

    #[tokio::test]
    async fn test_transition_to_pending_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, &[record_with("a", 1, "alice")]);
        let sync = synchronizer(store);

        let err = sync
            .transition("a", RecordStatus::Pending, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_body_id_must_match_its_key() {
        let store = Arc::new(MemoryStore::new());
        store.insert("record_keys", br#"["a"]"#.to_vec());
        store.insert(
            "record_a",
            record::encode(&record_with("zzz", 1, "alice")).unwrap(),
        );
        let sync = synchronizer(store);

        assert!(matches!(
            sync.record("a").await,
            Err(RegistryError::Decode(_))
        ));
        assert!(sync.refresh().await.unwrap().is_empty());
        assert!(matches!(
            sync.verify("a", "alice").await,
            Err(RegistryError::NotFound(id)) if id == "a"
        ));
    }

    #[tokio::test]
    async fn test_undecodable_record_is_not_found_for_transition() {
        let store = Arc::new(MemoryStore::new());
        store.insert("record_broken", b"\x00\x01".to_vec());
        let sync = synchronizer(store);

        let err = sync.verify("broken", "alice").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(id) if id == "broken"));
    }
}
