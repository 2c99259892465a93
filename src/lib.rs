// Herald - LAN announcement and update distribution
// Library exports

pub mod config;
pub mod errors;
pub mod logging;
pub mod messages;
pub mod network;
pub mod server;
pub mod service;
pub mod store;

pub use errors::{ServerError, StoreError, SyncError};
