//! Call transport: framed envelopes over duplex channels, and remote calls on top

mod channel;
pub mod frame;
mod port;
pub mod rpc;

pub use channel::MessageChannel;
pub use frame::{Encoding, MAX_FRAME_SIZE};
pub use port::{ListenerId, MessagePort, WeakPort};
pub use rpc::{expose, CallHandler, PendingCall, RpcClient};
