#[cfg(feature = "database")]
pub mod batch;
pub mod manager;
#[cfg(feature = "metrics")]
pub mod metrics;
#[cfg(feature = "database")]
pub mod store;
pub mod types;

#[cfg(feature = "database")]
pub use batch::{BatchConfig, BatchWriter};
pub use manager::SessionManager;
#[cfg(feature = "database")]
pub use store::SessionStore;
pub use types::{
    ConnectionInfo, Protocol as SessionProtocol, Session, SessionFilter, SessionStatus,
};
