pub mod client;
pub mod config;
pub mod error;
pub mod host;
pub mod persister;
pub mod platform;
pub mod store;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
