pub mod auth;
pub mod handlers;
pub mod server;
pub mod types;

pub use server::start_api_server;
