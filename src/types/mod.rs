mod protocol;

pub use protocol::{Envelope, Method};
