//! Store and query tunables.

use std::path::Path;

use crate::error::GrantError;
use crate::primitives::DEFAULT_ADDRESS_PREFIX;

/// Tunables shared by the store, the query service and the sweeper.
///
/// Every field has a default, so a config file only needs the fields it changes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Page size used when a request asks for 0 entries.
    pub default_page_size: u32,
    /// Requests above this are clamped.
    pub max_page_size: u32,
    /// Entries fetched from the backend per read while scanning.
    pub scan_chunk_size: u32,
    pub sweep_interval_secs: u64,
    /// Most grants one sweep pass deletes.
    pub sweep_batch_limit: u32,
    /// Human-readable prefix of account addresses.
    pub address_prefix: String,
    /// Flush the file backend's log to disk on every write.
    pub sync_writes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            default_page_size: 100,
            max_page_size: 1000,
            scan_chunk_size: 64,
            sweep_interval_secs: 60,
            sweep_batch_limit: 1000,
            address_prefix: DEFAULT_ADDRESS_PREFIX.to_string(),
            sync_writes: true,
        }
    }
}

impl StoreConfig {
    pub fn from_json_str(text: &str) -> Result<Self, GrantError> {
        let config: StoreConfig =
            serde_json::from_str(text).map_err(|e| GrantError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, GrantError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| GrantError::InvalidConfig(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), GrantError> {
        if self.default_page_size == 0 || self.max_page_size == 0 || self.scan_chunk_size == 0 {
            return Err(GrantError::InvalidConfig("page and chunk sizes must be non-zero".into()));
        }
        if self.default_page_size > self.max_page_size {
            return Err(GrantError::InvalidConfig(format!(
                "default_page_size {} exceeds max_page_size {}",
                self.default_page_size, self.max_page_size
            )));
        }
        if self.sweep_batch_limit == 0 || self.sweep_interval_secs == 0 {
            return Err(GrantError::InvalidConfig("sweep interval and batch limit must be non-zero".into()));
        }
        if self.address_prefix.is_empty() || !self.address_prefix.bytes().all(|b| b.is_ascii_lowercase()) {
            return Err(GrantError::InvalidConfig(format!(
                "address prefix {:?} must be lowercase ascii letters",
                self.address_prefix
            )));
        }
        Ok(())
    }

    /// Resolves a requested page size: 0 means the default, anything above the maximum is clamped.
    pub fn effective_page_size(&self, requested: u32) -> usize {
        let size = if requested == 0 { self.default_page_size } else { requested };
        size.min(self.max_page_size) as usize
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = StoreConfig::from_json_str(r#"{ "default_page_size": 5 }"#).unwrap();
        assert_eq!(config.default_page_size, 5);
        assert_eq!(config.max_page_size, StoreConfig::default().max_page_size);
    }

    #[test]
    fn test_rejects_inconsistent_sizes() {
        assert!(StoreConfig::from_json_str(r#"{ "default_page_size": 0 }"#).is_err());
        assert!(StoreConfig::from_json_str(r#"{ "default_page_size": 10, "max_page_size": 5 }"#).is_err());
        assert!(StoreConfig::from_json_str(r#"{ "address_prefix": "Acct" }"#).is_err());
        assert!(StoreConfig::from_json_str(r#"{ "page_size": 1 }"#).is_err());
    }

    #[test]
    fn test_effective_page_size() {
        let config = StoreConfig::default();
        assert_eq!(config.effective_page_size(0), 100);
        assert_eq!(config.effective_page_size(7), 7);
        assert_eq!(config.effective_page_size(u32::MAX), 1000);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "scan_chunk_size": 2, "sync_writes": false }}"#).unwrap();
        let config = StoreConfig::load(file.path()).unwrap();
        assert_eq!(config.scan_chunk_size, 2);
        assert!(!config.sync_writes);
        assert!(StoreConfig::load(file.path().with_extension("missing")).is_err());
    }
}
