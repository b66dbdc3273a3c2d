//! Client-side synchronizer for a voter registry kept in a remote key/value store
//!
//! - `store`: the key/value boundary and two implementations
//! - `record`: record types and their JSON encoding
//! - `index`: the list of known record ids
//! - `sync`: refresh, register and status transitions over a cached snapshot

pub mod config;
pub mod error;
pub mod index;
pub mod metrics;
pub mod record;
pub mod sealer;
pub mod store;
pub mod sync;

pub use config::RuntimeConfig;
pub use error::{RegistryError, Result, StoreError, SubmissionStage};
pub use index::IndexManager;
pub use record::{RecordId, RecordStatus, RegistrationInput, VoterRecord};
pub use sealer::{PlaceholderSealer, Sealer};
pub use store::{FileStore, MemoryStore, RemoteStore};
pub use sync::{Snapshot, Stats, Synchronizer};
