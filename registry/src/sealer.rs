//! Sealing of the sensitive registration field
//!
//! `PlaceholderSealer` is a reversible encoding and gives no secrecy. A real
//! deployment plugs a privacy-preserving service in behind `Sealer`.

use crate::error::{RegistryError, Result};
use base64::Engine;

const SEALED_PREFIX: &str = "FHE-";

pub trait Sealer: Send + Sync {
    fn seal(&self, plaintext: &str) -> String;
    fn unseal(&self, sealed: &str) -> Result<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderSealer;

impl Sealer for PlaceholderSealer {
    fn seal(&self, plaintext: &str) -> String {
        format!(
            "{}{}",
            SEALED_PREFIX,
            base64::engine::general_purpose::STANDARD.encode(plaintext.as_bytes())
        )
    }

    fn unseal(&self, sealed: &str) -> Result<String> {
        let body = sealed
            .strip_prefix(SEALED_PREFIX)
            .ok_or_else(|| RegistryError::Decode("missing sealed payload marker".to_string()))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(body)
            .map_err(|e| RegistryError::Decode(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| RegistryError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_unseal() {
        let sealer = PlaceholderSealer;
        let sealed = sealer.seal("passport 1234");
        assert!(sealed.starts_with("FHE-"));
        assert!(!sealed.contains("passport"));
        assert_eq!(sealer.unseal(&sealed).unwrap(), "passport 1234");
    }

    #[test]
    fn test_unseal_rejects_unmarked() {
        let sealer = PlaceholderSealer;
        assert!(sealer.unseal("cGFzc3BvcnQ=").is_err());
        assert!(sealer.unseal("FHE-***").is_err());
    }
}
