pub mod bench;
pub mod client;
pub mod config;
pub mod error;
pub mod properties;
pub mod scheduler;
pub mod server;
pub mod shutdown;
pub mod store;
