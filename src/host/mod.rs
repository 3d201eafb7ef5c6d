mod daemon;
mod server;

pub use daemon::Daemon;
pub use server::{CacheHost, ConnectionInfo, StoreDispatcher};
