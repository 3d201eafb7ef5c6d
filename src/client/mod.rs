mod commands;
mod handshake;
mod proxy;
mod storage;

pub use commands::{parse_value, run, ClientArgs, Commands, OutputFormat};
pub use handshake::{Handshake, HandshakeState};
pub use proxy::{SharedStorage, StorageOptions};
pub use storage::AsyncStorage;
