//! vmgrid.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ManagerConfig {
    pub manager: ManagerSection,
    pub store: StoreConfig,
    pub reconcile: ReconcileConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ManagerSection {
    /// Run every pipeline on the caller's task instead of the worker queue.
    pub blocking: bool,
    /// Number of queue workers in non-blocking mode.
    pub workers: usize,
    /// Maximum number of queued tasks before dispatch fails.
    pub queue_capacity: usize,
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            blocking: false,
            workers: 4,
            queue_capacity: 256,
        }
    }
}

/// Which storage provider backs the reservation store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Durable redb file.
    Redb { path: PathBuf },
    /// Ephemeral, lost on restart.
    Memory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Redb {
            path: PathBuf::from("/var/lib/vmgrid/reservations.redb"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Minimum gap between two scheduled reconciliations.
    pub min_interval_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 8450 }
    }
}

impl ManagerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ManagerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_empty() {
        let config: ManagerConfig = toml::from_str("").unwrap();
        assert_eq!(config, ManagerConfig::default());
        assert!(!config.manager.blocking);
        assert_eq!(config.manager.workers, 4);
        assert_eq!(config.reconcile.min_interval_secs, 60);
        assert_eq!(config.api.port, 8450);
    }

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
[manager]
blocking = true
workers = 2

[store]
type = "memory"

[reconcile]
min_interval_secs = 300
"#;
        let config: ManagerConfig = toml::from_str(toml_str).unwrap();
        assert!(config.manager.blocking);
        assert_eq!(config.manager.workers, 2);
        assert_eq!(config.manager.queue_capacity, 256);
        assert_eq!(config.store, StoreConfig::Memory);
        assert_eq!(config.reconcile.min_interval_secs, 300);
    }

    #[test]
    fn test_parse_redb_store() {
        let toml_str = r#"
[store]
type = "redb"
path = "/tmp/vmgrid.redb"
"#;
        let config: ManagerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.store,
            StoreConfig::Redb {
                path: PathBuf::from("/tmp/vmgrid.redb")
            }
        );
    }

    #[test]
    fn test_from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vmgrid.toml");

        let mut config = ManagerConfig::default();
        config.api.port = 9000;
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = ManagerConfig::from_file(&path).unwrap();
        assert_eq!(loaded.api.port, 9000);
    }
}
