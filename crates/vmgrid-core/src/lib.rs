pub mod config;
pub mod params;

pub use config::{ApiConfig, ManagerConfig, ManagerSection, ReconcileConfig, StoreConfig};
pub use params::*;
