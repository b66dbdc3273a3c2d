//! Voter record types and their byte encoding
//!
//! Records are stored as JSON objects with camelCase field names. A missing
//! `status` field decodes as `pending`.

use crate::error::{RegistryError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque record identifier
pub type RecordId = String;

const ID_SUFFIX_LEN: usize = 7;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    #[default]
    Pending,
    Verified,
    Rejected,
}

impl RecordStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecordStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Verified => "verified",
            RecordStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(RecordStatus::Pending),
            "verified" => Ok(RecordStatus::Verified),
            "rejected" => Ok(RecordStatus::Rejected),
            other => Err(RegistryError::Decode(format!("unknown status {:?}", other))),
        }
    }
}

/// A single voter registration entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterRecord {
    pub id: RecordId,
    pub encrypted_data: String,
    pub timestamp: u64,
    pub owner: String,
    pub region: String,
    pub age_group: String,
    #[serde(default)]
    pub status: RecordStatus,
}

/// Fields supplied by the registering principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationInput {
    pub region: String,
    pub age_group: String,
    pub sensitive_info: String,
}

impl VoterRecord {
    /// Creates a new pending record stamped with the current time
    pub fn new(owner: String, region: String, age_group: String, encrypted_data: String) -> Self {
        Self {
            id: generate_id(),
            encrypted_data,
            timestamp: unix_now_secs(),
            owner,
            region,
            age_group,
            status: RecordStatus::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == RecordStatus::Pending
    }

    /// Copy of this record carrying a different status
    pub fn with_status(&self, status: RecordStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

/// Serializes a record to its stored form
pub fn encode(record: &VoterRecord) -> Result<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| RegistryError::Encode(e.to_string()))
}

/// Parses a stored record; empty or malformed bytes are a decode error
pub fn decode(bytes: &[u8]) -> Result<VoterRecord> {
    if bytes.is_empty() {
        return Err(RegistryError::Decode("empty payload".to_string()));
    }
    serde_json::from_slice(bytes).map_err(|e| RegistryError::Decode(e.to_string()))
}

/// `<unix millis>-<random base36 suffix>`
pub fn generate_id() -> RecordId {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("{}-{}", millis, suffix)
}

pub fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
