pub mod crud;
pub mod engine;
pub mod loader;
pub mod matcher;
pub mod persistence;
pub mod stats;
pub mod types;
pub mod watcher;

pub use engine::AclEngine;
pub use loader::{create_example_acl_config, load_acl_config, load_acl_config_sync};
pub use stats::{AclStats, AclStatsSnapshot};
pub use types::{AclConfig, AclDecision, Action, Protocol};
pub use watcher::AclWatcher;
