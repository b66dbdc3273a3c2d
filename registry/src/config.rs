use log::warn;
use serde_derive::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Principal used as owner of new records and as signer of writes
    pub principal: String,
    /// Key holding the serialized list of record ids
    pub index_key: String,
    /// Records live under `<record_key_prefix><id>`
    pub record_key_prefix: String,
    pub store_timeout_ms: u64,
    /// Compare-and-set attempts before an index append gives up
    pub append_max_retries: u32,
    /// Directory of the file store
    pub data_dir: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        RuntimeConfig {
            principal: "anonymous".to_string(),
            index_key: "record_keys".to_string(),
            record_key_prefix: "record_".to_string(),
            store_timeout_ms: 10_000,
            append_max_retries: 8,
            data_dir: "./data".to_string(),
        }
    }

    pub fn from_toml(path: &str) -> Option<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(
                    "Something went wrong reading the runtime config file, {:?}",
                    e
                );
                return Some(RuntimeConfig::new());
            }
        };
        match toml::from_str(&contents) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(
                    "Something went wrong reading the runtime config file, {:?}",
                    e
                );
                Some(RuntimeConfig::new())
            }
        }
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = principal.into();
        self
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn record_key(&self, id: &str) -> String {
        format!("{}{}", self.record_key_prefix, id)
    }
}
