pub mod acl_management;
pub mod diagnostics;
pub mod management;
pub mod pool;
pub mod sessions;
pub mod system_resources;
pub mod telemetry;

pub use acl_management::*;
pub use diagnostics::*;
pub use management::*;
pub use pool::*;
pub use sessions::*;
pub use system_resources::*;
pub use telemetry::*;
